//! Poller: pulls the upstream change log on a fixed interval and feeds the
//! broadcast queue.
//!
//! The poller is the only owner of the cursor and the only caller of
//! `list_changes_since`, so neither needs a lock. Ticks never overlap: the
//! loop awaits the in-flight call (and any blocked enqueue) before waiting
//! for the next tick, and missed ticks are skipped rather than bunched.

use std::time::Duration;

use beadcast_core::cursor::CursorTracker;
use beadcast_hub::{BroadcastSender, HubError};
use beadcast_upstream::ChangeLog;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Default poll interval (2 seconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Floor for the tick period; `tokio::time::interval` rejects zero.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Upstream answered; `forwarded` events were queued.
    Forwarded {
        fetched: usize,
        forwarded: usize,
        cursor: i64,
    },
    /// Upstream failed; cursor untouched, retry on the next tick.
    Skipped,
    /// The hub is gone; nothing left to feed.
    QueueClosed,
}

pub struct Poller<U> {
    upstream: U,
    cursor: CursorTracker,
    queue: BroadcastSender,
    config: PollerConfig,
}

impl<U: ChangeLog> Poller<U> {
    pub fn new(upstream: U, queue: BroadcastSender, config: PollerConfig) -> Self {
        Self {
            upstream,
            cursor: CursorTracker::new(),
            queue,
            config,
        }
    }

    #[must_use]
    pub fn with_cursor(mut self, cursor: CursorTracker) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> i64 {
        self.cursor.current()
    }

    /// One synchronization round.
    ///
    /// The cursor advances before events are queued. Events at or below the
    /// previous cursor are forwarded like any other; viewers treat every
    /// message as a refresh trigger, so duplicates are harmless.
    pub async fn tick(&mut self) -> TickOutcome {
        let since = self.cursor.current();
        let events = match self.upstream.list_changes_since(since).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(cursor = since, error = %e, "poll tick failed, retrying next tick");
                return TickOutcome::Skipped;
            }
        };

        let cursor = self.cursor.advance(&events);
        let mut forwarded = 0;
        for event in &events {
            match self.queue.send_event(event).await {
                Ok(()) => forwarded += 1,
                Err(HubError::QueueClosed) => {
                    tracing::info!(cursor, "broadcast queue closed, poller stopping");
                    return TickOutcome::QueueClosed;
                }
                Err(e) => {
                    tracing::warn!(entity = %event.entity_id, error = %e, "dropping unencodable event");
                }
            }
        }

        TickOutcome::Forwarded {
            fetched: events.len(),
            forwarded,
            cursor,
        }
    }

    /// Tick until cancelled or the queue closes. Returns the final cursor.
    pub async fn run(mut self, cancel: CancellationToken) -> i64 {
        let mut ticker = interval(self.config.interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!(cursor = self.cursor(), "poller: cancellation requested, stopping");
                    break;
                }
                _ = ticker.tick() => match self.tick().await {
                    TickOutcome::QueueClosed => break,
                    TickOutcome::Forwarded { fetched, forwarded, cursor } if fetched > 0 => {
                        tracing::debug!(fetched, forwarded, cursor, "poll tick forwarded events");
                    }
                    TickOutcome::Forwarded { .. } | TickOutcome::Skipped => {}
                },
            }
        }

        self.cursor()
    }
}
