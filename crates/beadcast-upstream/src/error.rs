//! Error types for the upstream daemon boundary.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("no beads database found")]
    NoDatabase,

    #[error("beads daemon not reachable at {socket}: {source}")]
    Unavailable {
        socket: String,
        #[source]
        source: std::io::Error,
    },

    #[error("beads daemon did not answer within {0:?}")]
    Timeout(Duration),

    #[error("beads daemon closed the connection without a response")]
    EmptyResponse,

    #[error("daemon rejected {operation}: {message}")]
    Rpc { operation: String, message: String },

    #[error("malformed daemon response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("daemon io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UpstreamError {
    /// The daemon could not be reached or stopped answering mid-request.
    ///
    /// These clear up once the daemon is (re)started. A missing database,
    /// a rejected request or an unparseable answer will not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::Timeout(_) | Self::EmptyResponse | Self::Io(_)
        )
    }
}
