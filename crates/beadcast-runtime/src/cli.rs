//! CLI definition using clap derive.

use std::path::PathBuf;
use std::time::Duration;

use beadcast_core::reconnect::{
    DEFAULT_FALLBACK_INTERVAL_MS, DEFAULT_RECONNECT_DELAY_MS, ReconnectConfig,
};
use beadcast_hub::hub::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WRITE_TIMEOUT_MS, HubConfig};
use beadcast_hub::server::DEFAULT_MAX_CONNECTIONS;
use beadcast_upstream::ClientConfig;
use beadcast_upstream::client::DEFAULT_REQUEST_TIMEOUT_MS;
use clap::{Parser, Subcommand};

use crate::poller::{DEFAULT_POLL_INTERVAL_MS, PollerConfig};

#[derive(Parser)]
#[command(name = "beadcast", about = "Live mutation relay for beads viewers")]
pub struct Cli {
    /// Daemon socket path (default: bd.sock next to the database)
    #[arg(long, short = 's', global = true, env = "BEADCAST_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Beads database path (default: search upward for .beads/*.db)
    #[arg(long, global = true, env = "BEADS_DB")]
    pub db: Option<PathBuf>,

    /// Upper bound on a single daemon request, in milliseconds
    #[arg(
        long,
        global = true,
        env = "BEADCAST_UPSTREAM_TIMEOUT_MS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub upstream_timeout_ms: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: Duration::from_millis(self.upstream_timeout_ms),
        }
    }
}

#[derive(Subcommand)]
pub enum Command {
    /// Relay daemon mutations to WebSocket clients
    Serve(ServeOpts),
    /// Follow the relay and print a refreshed summary on every change
    Watch(WatchOpts),
}

#[derive(clap::Args)]
pub struct ServeOpts {
    /// Interface to listen on
    #[arg(long, env = "BEADCAST_HOST", default_value = "localhost")]
    pub host: String,

    /// Port to listen on
    #[arg(long, short = 'p', env = "BEADCAST_PORT", default_value_t = 8082)]
    pub port: u16,

    /// Poll interval in milliseconds
    #[arg(
        long,
        env = "BEADCAST_POLL_INTERVAL_MS",
        default_value_t = DEFAULT_POLL_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// Broadcast queue capacity (events)
    #[arg(long, env = "BEADCAST_QUEUE_CAPACITY", default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Per-client write timeout in milliseconds
    #[arg(
        long,
        env = "BEADCAST_WRITE_TIMEOUT_MS",
        default_value_t = DEFAULT_WRITE_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub write_timeout_ms: u64,

    /// Maximum concurrent WebSocket clients
    #[arg(long, env = "BEADCAST_MAX_CONNECTIONS", default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,
}

impl ServeOpts {
    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity.max(1),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

#[derive(clap::Args)]
pub struct WatchOpts {
    /// Push endpoint of a running relay
    #[arg(long, env = "BEADCAST_URL", default_value = "ws://localhost:8082/ws")]
    pub url: String,

    /// Delay before reconnecting after the push channel drops, in milliseconds
    #[arg(long, env = "BEADCAST_RECONNECT_DELAY_MS", default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    pub reconnect_delay_ms: u64,

    /// Direct refresh interval while disconnected, in milliseconds
    #[arg(
        long,
        env = "BEADCAST_FALLBACK_INTERVAL_MS",
        default_value_t = DEFAULT_FALLBACK_INTERVAL_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub fallback_interval_ms: u64,
}

impl WatchOpts {
    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            fallback_interval: Duration::from_millis(self.fallback_interval_ms),
        }
    }
}
