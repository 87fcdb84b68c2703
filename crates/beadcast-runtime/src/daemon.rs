//! `serve`: wires discovery → daemon client → poller → hub → push server and
//! runs them until a shutdown signal.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use beadcast_hub::{PushServer, WsRegistry, broadcast_queue};
use beadcast_upstream::{ClientConfig, DaemonClient, ReadApi, UpstreamError, UpstreamLocation};
use tokio_util::sync::CancellationToken;

use crate::cli::ServeOpts;
use crate::poller::Poller;

/// Locate the daemon, turning a missing database into an actionable error.
pub fn locate(
    socket: Option<&Path>,
    db: Option<&Path>,
) -> anyhow::Result<UpstreamLocation> {
    let cwd = std::env::current_dir().context("cannot read current directory")?;
    match beadcast_upstream::resolve(socket, db, &cwd) {
        Ok(location) => Ok(location),
        Err(UpstreamError::NoDatabase) => bail!(
            "no beads database found\n\nHint: run 'bd init' in your project, or pass --db <path>"
        ),
        Err(e) => Err(e).context("cannot resolve the beads database path"),
    }
}

/// Build a client pinned to the discovered database.
pub fn build_client(location: &UpstreamLocation, config: ClientConfig) -> DaemonClient {
    let client = DaemonClient::new(&location.socket).with_config(config);
    match &location.database {
        Some(db) => client.with_database_path(db.to_string_lossy()),
        None => client,
    }
}

/// Startup health check. Unreachable or unhealthy daemons are fatal.
pub async fn check_health<R: ReadApi>(api: &R, socket: &Path) -> anyhow::Result<()> {
    let health = match api.health().await {
        Ok(health) => health,
        Err(e) if e.is_transient() => {
            return Err(anyhow::Error::new(e).context(format!(
                "beads daemon not reachable at {}\n\nStart it with: bd daemon\nThen run: beadcast serve",
                socket.display()
            )));
        }
        Err(e) => return Err(e).context("daemon health check failed"),
    };

    if !health.is_healthy() {
        bail!(
            "beads daemon is not healthy (status: {})\n\nTry: bd daemon --stop && bd daemon",
            health.status
        );
    }

    tracing::info!(version = %health.version, socket = %socket.display(), "connected to beads daemon");
    Ok(())
}

async fn listen_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("cannot resolve listen address {host}:{port}"))?
        .next()
        .with_context(|| format!("listen address {host}:{port} resolved to nothing"))
}

/// Run the relay: poll loop, hub, and push server, waiting for shutdown.
pub async fn run_serve(
    opts: ServeOpts,
    location: UpstreamLocation,
    client_config: ClientConfig,
) -> anyhow::Result<()> {
    let client = build_client(&location, client_config);
    if let Some(db) = client.database_path() {
        tracing::info!(database = db, "using beads database");
    }
    check_health(&client, &location.socket).await?;

    let cancel = CancellationToken::new();
    let registry = Arc::new(WsRegistry::new());
    let (queue, hub) = broadcast_queue(opts.hub_config(), Arc::clone(&registry));

    let addr = listen_addr(&opts.host, opts.port).await?;
    let server = PushServer::new(addr, Arc::clone(&registry), cancel.clone())
        .with_max_connections(opts.max_connections.max(1));
    let (listener, local_addr) = server
        .bind()
        .await
        .with_context(|| format!("cannot listen on {addr}"))?;
    tracing::info!(
        addr = %local_addr,
        push_url = %format!("ws://{}:{}/ws", opts.host, local_addr.port()),
        "beadcast relay listening"
    );

    let server_handle = tokio::spawn(async move { server.serve(listener).await });
    let hub_handle = tokio::spawn(hub.run(cancel.clone()));
    let poller = Poller::new(client, queue, opts.poller_config());
    let poller_handle = tokio::spawn(poller.run(cancel.clone()));

    wait_for_shutdown().await?;

    // Stop producing and accepting, let the hub finish the message it is
    // on, then release the connections it was writing to. Handshakes still
    // in flight are refused by the sealed registry.
    cancel.cancel();
    let cursor = poller_handle.await.context("poller task panicked")?;
    let dispatched = hub_handle.await.context("hub task panicked")?;
    let closed = registry.shut_down().await;
    server_handle
        .await
        .context("push server task panicked")?
        .context("push server failed")?;

    tracing::info!(cursor, dispatched, closed, "beadcast relay stopped");
    Ok(())
}

/// Wait for ctrl-c or SIGTERM.
async fn wait_for_shutdown() -> anyhow::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .context("failed to register SIGTERM handler")?;
        tokio::select! {
            _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
            _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, shutting down");
    }

    Ok(())
}
