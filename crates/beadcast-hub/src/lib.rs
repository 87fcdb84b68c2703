//! beadcast-hub: fan-out of mutation events to push clients.
//! Bounded broadcast queue, client registry, and the WebSocket push server.

pub mod connection;
pub mod error;
pub mod hub;
pub mod registry;
pub mod server;
pub mod sink;

pub use connection::{CloseReason, ConnectionState, WsSink};
pub use error::HubError;
pub use hub::{BroadcastHub, BroadcastSender, DispatchReport, HubConfig, broadcast_queue};
pub use registry::{ClientHandle, ClientId, ClientRegistry};
pub use server::{PushServer, WsRegistry};
pub use sink::{ClientSink, Payload};
