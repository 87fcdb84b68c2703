//! Error types for the broadcast hub.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("broadcast queue closed")]
    QueueClosed,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}
