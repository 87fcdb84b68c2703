//! Broadcast hub: a bounded queue between the poller and the fan-out loop.
//!
//! The producer blocks when the queue is full; nothing is dropped at the
//! hub. The dispatch loop takes one payload at a time and finishes its
//! fan-out before taking the next, so every client sees events in queue
//! order.

use std::sync::Arc;
use std::time::Duration;

use beadcast_core::types::MutationEvent;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::HubError;
use crate::registry::{ClientId, ClientRegistry};
use crate::sink::{ClientSink, Payload};

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default bound on a single client write (10 seconds).
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub queue_capacity: usize,
    /// A client whose write takes longer than this is dropped.
    pub write_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
        }
    }
}

/// Create a queue and the hub that drains it.
pub fn broadcast_queue<S: ClientSink>(
    config: HubConfig,
    registry: Arc<ClientRegistry<S>>,
) -> (BroadcastSender, BroadcastHub<S>) {
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    (
        BroadcastSender { tx },
        BroadcastHub {
            rx,
            registry,
            write_timeout: config.write_timeout,
        },
    )
}

// ─── Producer side ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BroadcastSender {
    tx: mpsc::Sender<Payload>,
}

impl BroadcastSender {
    /// Enqueue a payload, waiting for space if the queue is full.
    pub async fn send(&self, payload: Payload) -> Result<(), HubError> {
        self.tx.send(payload).await.map_err(|_| HubError::QueueClosed)
    }

    /// Serialize once and enqueue.
    pub async fn send_event(&self, event: &MutationEvent) -> Result<(), HubError> {
        let payload: Payload = event.to_payload()?.into();
        self.send(payload).await
    }
}

// ─── Consumer side ───────────────────────────────────────────────────

/// Outcome of fanning out one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub evicted: Vec<ClientId>,
}

pub struct BroadcastHub<S> {
    rx: mpsc::Receiver<Payload>,
    registry: Arc<ClientRegistry<S>>,
    write_timeout: Duration,
}

impl<S: ClientSink> BroadcastHub<S> {
    /// Drain the queue until cancelled or every sender is gone.
    ///
    /// A dispatch already in progress when cancellation fires runs to
    /// completion. Returns the number of payloads dispatched.
    pub async fn run(mut self, cancel: CancellationToken) -> u64 {
        let mut dispatched = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(dispatched, "broadcast hub: cancellation requested, stopping");
                    break;
                }
                next = self.rx.recv() => {
                    let Some(payload) = next else {
                        tracing::info!(dispatched, "broadcast hub: queue closed, stopping");
                        break;
                    };
                    let report = self.dispatch_one(&payload).await;
                    dispatched += 1;
                    tracing::trace!(
                        delivered = report.delivered,
                        evicted = report.evicted.len(),
                        "event dispatched"
                    );
                }
            }
        }
        dispatched
    }

    /// Deliver one payload to every registered client.
    ///
    /// Writes run concurrently over a registry snapshot. A client whose
    /// write fails or times out is deregistered on the spot; the others are
    /// unaffected and the payload is not retried.
    pub async fn dispatch_one(&self, payload: &Payload) -> DispatchReport {
        let clients = self.registry.snapshot().await;
        if clients.is_empty() {
            return DispatchReport::default();
        }

        let registry = &self.registry;
        let write_timeout = self.write_timeout;
        let outcomes = join_all(clients.iter().map(|client| async move {
            if client.is_closed() {
                return None;
            }
            let result = match tokio::time::timeout(write_timeout, client.sink().deliver(payload))
                .await
            {
                Ok(r) => r,
                Err(_) => Err(HubError::WriteTimeout(write_timeout)),
            };
            match result {
                Ok(()) => Some(Ok(())),
                Err(e) => {
                    tracing::debug!(client = %client.id(), error = %e, "delivery failed, dropping client");
                    registry.deregister(client.id()).await;
                    Some(Err(client.id()))
                }
            }
        }))
        .await;

        let mut report = DispatchReport::default();
        for outcome in outcomes.into_iter().flatten() {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(id) => report.evicted.push(id),
            }
        }
        report
    }
}
