//! Per-connection handler for push clients.
//!
//! ```text
//! Connecting --(upgrade ok, registered)--> Open --(read error | close | eviction)--> Closed
//! ```
//!
//! While `Open` the handler only reads, to notice the peer going away.
//! Inbound application frames are ignored. Entering `Closed` deregisters the
//! client (a no-op if the hub already evicted it) and releases the socket.
//! A connection that finishes its upgrade after the registry shut down goes
//! straight from `Connecting` to `Closed`.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::registry::{ClientHandle, ClientRegistry};
use crate::sink::{ClientSink, Payload};

/// Bound on sending a close frame to a peer that may have stalled.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Close frame received or stream ended.
    PeerClosed,
    ReadError,
    /// Removed from the registry by someone else (failed write, shutdown drain).
    Evicted,
    /// Server shutting down.
    Shutdown,
}

// ─── WebSocket sink ──────────────────────────────────────────────────

/// Outbound half of a WebSocket, shared between the hub and the handler.
pub struct WsSink<T> {
    inner: Mutex<SplitSink<WebSocketStream<T>, Message>>,
}

impl<T> WsSink<T> {
    pub fn new(inner: SplitSink<WebSocketStream<T>, Message>) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }
}

impl<T> ClientSink for WsSink<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn deliver(&self, payload: &Payload) -> Result<(), HubError> {
        let mut sink = self.inner.lock().await;
        sink.send(Message::Text(payload.to_string()))
            .await
            .map_err(|e| HubError::Delivery(e.to_string()))
    }

    async fn close(&self) {
        let mut sink = self.inner.lock().await;
        let _ = sink.close().await;
    }
}

// ─── Handler ─────────────────────────────────────────────────────────

/// Drive one upgraded connection from `Connecting` to `Closed`.
pub async fn serve_connection<T>(
    ws_stream: WebSocketStream<T>,
    registry: Arc<ClientRegistry<WsSink<T>>>,
    shutdown: CancellationToken,
) -> CloseReason
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = ws_stream.split();
    let handle = registry.handle(WsSink::new(tx));
    let id = handle.id();
    let mut state = ConnectionState::Connecting;

    let reason = if registry.insert(Arc::clone(&handle)).await {
        transition(&handle, &mut state, ConnectionState::Open);
        watch_liveness(rx, handle.closed(), &shutdown).await
    } else {
        // Registry already drained for shutdown.
        CloseReason::Shutdown
    };

    transition(&handle, &mut state, ConnectionState::Closed);
    registry.deregister(id).await;
    if tokio::time::timeout(CLOSE_TIMEOUT, handle.sink().close())
        .await
        .is_err()
    {
        tracing::debug!(client = %id, "ws: close frame timed out");
    }
    tracing::debug!(client = %id, reason = ?reason, "ws client closed");
    reason
}

fn transition<S>(handle: &ClientHandle<S>, state: &mut ConnectionState, next: ConnectionState) {
    tracing::trace!(client = %handle.id(), from = ?*state, to = ?next, "connection state");
    *state = next;
}

/// Read until the peer goes away, the handle is evicted, or shutdown.
///
/// Text and binary frames are discarded; ping replies are queued by the
/// WebSocket layer itself.
pub async fn watch_liveness<R>(
    mut rx: R,
    evicted: &CancellationToken,
    shutdown: &CancellationToken,
) -> CloseReason
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Close(_))) | None => return CloseReason::PeerClosed,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(error = %e, "ws read error");
                    return CloseReason::ReadError;
                }
            },
            _ = evicted.cancelled() => return CloseReason::Evicted,
            _ = shutdown.cancelled() => return CloseReason::Shutdown,
        }
    }
}
