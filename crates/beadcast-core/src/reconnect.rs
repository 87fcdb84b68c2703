//! Viewer-side reconnect state machine.
//!
//! A viewer keeps one push connection to the relay. While that connection is
//! down it falls back to polling the read API directly, and it retries the
//! push connection on a fixed delay:
//!
//! ```text
//!   Disconnected --ReconnectTimerFired--> Connecting --ConnectSucceeded--> Connected
//!        ^                                   |                               |
//!        +-----------ConnectFailed-----------+-------ConnectionClosed--------+
//! ```
//!
//! Fallback polling is orthogonal to the link state: it is switched on when
//! the link enters `Disconnected` and off when it reaches `Connected`.
//!
//! The machine is pure. It consumes [`ReconnectInput`]s and returns the
//! [`ReconnectAction`]s the driver must perform (arm timers, open sockets,
//! refresh state).

use std::time::Duration;

/// Default delay before retrying the push connection (5 seconds).
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Default fallback polling interval (30 seconds).
pub const DEFAULT_FALLBACK_INTERVAL_MS: u64 = 30_000;

/// Shortest fallback period the machine hands out; periodic timers reject zero.
pub const MIN_FALLBACK_INTERVAL: Duration = Duration::from_millis(1);

// ─── Config ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub reconnect_delay: Duration,
    pub fallback_interval: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            fallback_interval: Duration::from_millis(DEFAULT_FALLBACK_INTERVAL_MS),
        }
    }
}

// ─── States, inputs, actions ─────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectInput {
    /// Viewer started; enters `Disconnected` for the first time.
    Start,
    /// The delay armed by `ScheduleReconnect` elapsed.
    ReconnectTimerFired,
    ConnectSucceeded,
    ConnectFailed,
    /// Established connection closed or errored.
    ConnectionClosed,
    /// A push message arrived. The payload is irrelevant.
    MessageReceived,
    /// The periodic timer armed by `StartFallbackPolling` ticked.
    FallbackTimerFired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    ScheduleReconnect(Duration),
    OpenConnection,
    StartFallbackPolling(Duration),
    StopFallbackPolling,
    /// Re-read full state through the read API.
    RefreshState,
}

// ─── Machine ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    config: ReconnectConfig,
    state: LinkState,
    fallback_polling: bool,
    started: bool,
}

impl ReconnectMachine {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config: ReconnectConfig {
                fallback_interval: config.fallback_interval.max(MIN_FALLBACK_INTERVAL),
                ..config
            },
            state: LinkState::Disconnected,
            fallback_polling: false,
            started: false,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_fallback_polling(&self) -> bool {
        self.fallback_polling
    }

    /// Apply one input and return the actions to perform, in order.
    ///
    /// Inputs that do not apply to the current state (a late timer, a
    /// message after close) yield no actions.
    pub fn handle(&mut self, input: ReconnectInput) -> Vec<ReconnectAction> {
        match (input, self.state) {
            (ReconnectInput::Start, _) if !self.started => {
                self.started = true;
                self.enter_disconnected()
            }
            (ReconnectInput::ReconnectTimerFired, LinkState::Disconnected) if self.started => {
                self.state = LinkState::Connecting;
                vec![ReconnectAction::OpenConnection]
            }
            (ReconnectInput::ConnectSucceeded, LinkState::Connecting) => self.enter_connected(),
            (ReconnectInput::ConnectFailed, LinkState::Connecting)
            | (ReconnectInput::ConnectionClosed, LinkState::Connecting | LinkState::Connected) => {
                self.enter_disconnected()
            }
            (ReconnectInput::MessageReceived, LinkState::Connected) => {
                vec![ReconnectAction::RefreshState]
            }
            (ReconnectInput::FallbackTimerFired, state)
                if self.fallback_polling && state != LinkState::Connected =>
            {
                vec![ReconnectAction::RefreshState]
            }
            _ => Vec::new(),
        }
    }

    fn enter_disconnected(&mut self) -> Vec<ReconnectAction> {
        self.state = LinkState::Disconnected;
        let mut actions = vec![ReconnectAction::ScheduleReconnect(
            self.config.reconnect_delay,
        )];
        if !self.fallback_polling {
            self.fallback_polling = true;
            actions.push(ReconnectAction::StartFallbackPolling(
                self.config.fallback_interval,
            ));
            actions.push(ReconnectAction::RefreshState);
        }
        actions
    }

    fn enter_connected(&mut self) -> Vec<ReconnectAction> {
        self.state = LinkState::Connected;
        let mut actions = Vec::with_capacity(2);
        if self.fallback_polling {
            self.fallback_polling = false;
            actions.push(ReconnectAction::StopFallbackPolling);
        }
        // Events may have been missed while disconnected.
        actions.push(ReconnectAction::RefreshState);
        actions
    }
}

impl Default for ReconnectMachine {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}
