//! Change-log cursor: the watermark of how much of the upstream mutation log
//! has been consumed.
//!
//! The cursor only moves forward. A batch that is empty, out of order, or
//! made entirely of retransmitted events never lowers it.

use crate::types::MutationEvent;

/// Monotonic change-log watermark in Unix milliseconds.
///
/// Owned by the poller; there is no shared access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorTracker {
    current: i64,
}

impl CursorTracker {
    /// Start from the beginning of the change log.
    pub fn new() -> Self {
        Self { current: 0 }
    }

    /// Resume from a known watermark.
    pub fn starting_at(ms: i64) -> Self {
        Self { current: ms }
    }

    pub fn current(&self) -> i64 {
        self.current
    }

    /// Fold a batch into the cursor: `max(current, max(timestamp))`.
    ///
    /// Returns the cursor after the update. An empty batch returns the
    /// current value unchanged.
    pub fn advance(&mut self, events: &[MutationEvent]) -> i64 {
        if let Some(newest) = events.iter().map(|e| e.timestamp).max() {
            self.current = self.current.max(newest);
        }
        self.current
    }
}
