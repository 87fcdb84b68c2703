use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::connection::{WsSink, serve_connection};
use crate::registry::ClientRegistry;

/// Registry of WebSocket push clients.
pub type WsRegistry = ClientRegistry<WsSink<TcpStream>>;

// ---------------------------------------------------------------------------
// Origin validation
// ---------------------------------------------------------------------------

/// Hosts a browser origin may name to be treated as local.
const LOCAL_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// Validate the `Origin` header on an incoming WebSocket upgrade request.
///
/// Allowed origins:
/// - `http://localhost[:port]`, `http://127.0.0.1[:port]`, `http://[::1][:port]`
///   (local dashboards); the host must match exactly
/// - `null` (file:// contexts)
/// - Absent origin header (non-browser clients like curl, the `watch` viewer)
///
/// All other origins are rejected with HTTP 403.
#[allow(clippy::result_large_err)]
fn validate_origin(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if let Some(origin) = req.headers().get("origin") {
        let origin_str = origin.to_str().unwrap_or("");
        if is_local_origin(origin_str) {
            return Ok(resp);
        }
        tracing::warn!(origin = %origin_str, "ws: rejected connection from disallowed origin");
        let mut err_resp = ErrorResponse::new(Some("Origin not allowed".into()));
        *err_resp.status_mut() = http::StatusCode::FORBIDDEN;
        return Err(err_resp);
    }
    Ok(resp)
}

fn is_local_origin(origin: &str) -> bool {
    if origin == "null" {
        return true;
    }
    origin.parse::<http::Uri>().is_ok_and(|uri| {
        uri.scheme_str() == Some("http")
            && uri
                .host()
                .is_some_and(|host| LOCAL_HOSTS.iter().any(|l| host.eq_ignore_ascii_case(l)))
    })
}

// ---------------------------------------------------------------------------
// PushServer
// ---------------------------------------------------------------------------

/// Default maximum number of concurrent push connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Default time to wait for open connections after the accept loop stops.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// WebSocket server for push clients.
///
/// Each accepted connection is registered with the shared registry; the
/// broadcast hub writes to it from there. The server itself never writes
/// application data.
pub struct PushServer {
    addr: SocketAddr,
    registry: Arc<WsRegistry>,
    cancel: CancellationToken,
    max_connections: usize,
    drain_timeout: Duration,
}

impl PushServer {
    pub fn new(addr: SocketAddr, registry: Arc<WsRegistry>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            registry,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set the maximum number of concurrent push connections.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set how long `serve` waits for open connections after cancellation.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Bind TCP, accept connections, and spawn per-client handlers until the
    /// cancellation token fires.
    pub async fn run(&self) -> std::io::Result<()> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    /// Useful when binding to port 0 to get an OS-assigned ephemeral port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "push server bound");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener.
    ///
    /// Connection handlers do not watch the server's token: they end when
    /// their client is removed from the registry (hub eviction or
    /// `shut_down`) or when the peer leaves. A handshake that completes
    /// after `shut_down` is closed right away. After the
    /// accept loop stops, `serve` waits up to the drain timeout for them.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));
        let tracker = TaskTracker::new();
        // Handlers only see this token if the drain timeout expires.
        let abandon = CancellationToken::new();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let permit = match Arc::clone(&semaphore).try_acquire_owned() {
                                Ok(permit) => permit,
                                Err(_) => {
                                    tracing::warn!(
                                        peer = %peer,
                                        max = self.max_connections,
                                        "ws: connection limit reached, rejecting"
                                    );
                                    drop(stream);
                                    continue;
                                }
                            };
                            tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                            let registry = Arc::clone(&self.registry);
                            let abandon = abandon.clone();
                            tracker.spawn(async move {
                                let _permit = permit;
                                match tokio_tungstenite::accept_hdr_async(stream, validate_origin).await {
                                    Ok(ws_stream) => {
                                        let reason = serve_connection(ws_stream, registry, abandon).await;
                                        tracing::debug!(peer = %peer, reason = ?reason, "ws client handler finished");
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                        }
                    }
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("push server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        drop(listener);
        tracker.close();
        if tokio::time::timeout(self.drain_timeout, tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(open = tracker.len(), "push server: drain timed out, dropping connections");
            abandon.cancel();
            tracker.wait().await;
        }

        Ok(())
    }
}
