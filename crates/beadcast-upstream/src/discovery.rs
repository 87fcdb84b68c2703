//! Locate the beads database and the daemon socket next to it.
//!
//! Precedence: explicit socket path, then explicit database path (the socket
//! is `bd.sock` beside it), then a walk up from the working directory looking
//! for `.beads/*.db`.

use std::path::{Path, PathBuf};

use crate::error::UpstreamError;

pub const BEADS_DIR: &str = ".beads";
pub const SOCKET_FILE_NAME: &str = "bd.sock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamLocation {
    /// Absolute database path, when one was given or found.
    pub database: Option<PathBuf>,
    pub socket: PathBuf,
}

/// Resolve where the daemon lives.
///
/// With an explicit socket the database is optional (discovered if
/// possible); without one, a database is required to derive the socket.
pub fn resolve(
    socket: Option<&Path>,
    database: Option<&Path>,
    cwd: &Path,
) -> Result<UpstreamLocation, UpstreamError> {
    let database = match database {
        Some(db) => Some(std::path::absolute(db)?),
        None => find_database(cwd),
    };

    let socket = match (socket, &database) {
        (Some(s), _) => s.to_path_buf(),
        (None, Some(db)) => socket_beside(db),
        (None, None) => return Err(UpstreamError::NoDatabase),
    };

    Ok(UpstreamLocation { database, socket })
}

fn socket_beside(db: &Path) -> PathBuf {
    db.parent()
        .map(|dir| dir.join(SOCKET_FILE_NAME))
        .unwrap_or_else(|| PathBuf::from(SOCKET_FILE_NAME))
}

/// Walk from `start` towards the root and return the first `.beads/*.db`.
/// Within one directory the lexicographically first match wins.
pub fn find_database(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        let beads = dir.join(BEADS_DIR);
        let entries = std::fs::read_dir(&beads).ok()?;
        let mut dbs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "db"))
            .collect();
        dbs.sort();
        dbs.into_iter().next()
    })
}
