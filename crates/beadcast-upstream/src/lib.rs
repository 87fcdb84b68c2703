//! beadcast-upstream: IO boundary to the beads daemon.
//! Change-log pulls, direct read queries, socket discovery. No relay logic.

pub mod client;
pub mod discovery;
pub mod error;
pub mod source;
pub mod translate;

pub use client::{ClientConfig, DaemonClient};
pub use discovery::{UpstreamLocation, resolve};
pub use error::UpstreamError;
pub use source::{ChangeLog, Health, ReadApi};
