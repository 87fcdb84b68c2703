//! beadcast-core: pure types and state machines shared by the relay and its viewers.
//! No IO here: the mutation event model, the change-log cursor, and the
//! viewer reconnect state machine.

pub mod cursor;
pub mod reconnect;
pub mod types;

pub use cursor::CursorTracker;
pub use reconnect::{LinkState, ReconnectAction, ReconnectConfig, ReconnectInput, ReconnectMachine};
pub use types::{MutationEvent, Operation};
