//! Outbound half of a push connection. Enables fake injection for testing.

use std::future::Future;
use std::sync::Arc;

use crate::error::HubError;

/// An event serialized once and shared by every delivery.
pub type Payload = Arc<str>;

pub trait ClientSink: Send + Sync + 'static {
    /// Write one message. An error means the connection is unusable.
    fn deliver(&self, payload: &Payload) -> impl Future<Output = Result<(), HubError>> + Send;

    /// Release the transport. Best effort; errors are swallowed.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
