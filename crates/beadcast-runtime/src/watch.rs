//! `beadcast watch`: reference viewer.
//!
//! Follows a relay's push channel and re-reads the board from the daemon on
//! every message. When the channel is down it keeps retrying and falls back
//! to periodic direct reads, as decided by [`ReconnectMachine`]. This module
//! only executes the machine's actions: timers, the WebSocket, and reads.

use std::collections::VecDeque;
use std::time::Duration;

use beadcast_core::reconnect::{
    LinkState, ReconnectAction, ReconnectConfig, ReconnectInput, ReconnectMachine,
};
use beadcast_upstream::{ReadApi, UpstreamError};
use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

/// Bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

type PushStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ─── Board ───────────────────────────────────────────────────────────

/// Everything the viewer shows, read in one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Board {
    pub issues: Value,
    pub ready: Value,
    pub stats: Value,
    pub epics: Value,
}

impl Board {
    pub fn summary(&self) -> String {
        let mut out = format!(
            "issues={} ready={} epics={}",
            count(&self.issues),
            count(&self.ready),
            count(&self.epics)
        );
        for (key, label) in [
            ("open_issues", "open"),
            ("in_progress_issues", "in_progress"),
            ("blocked_issues", "blocked"),
            ("closed_issues", "closed"),
        ] {
            if let Some(n) = self.stats.get(key).and_then(Value::as_u64) {
                out.push_str(&format!(" {label}={n}"));
            }
        }
        out
    }
}

fn count(value: &Value) -> usize {
    value.as_array().map_or(0, Vec::len)
}

/// One output line: local time, channel mode, board summary.
pub fn render_line(board: &Board, link: LinkState, at: chrono::NaiveTime) -> String {
    let mode = match link {
        LinkState::Connected => "live",
        LinkState::Connecting | LinkState::Disconnected => "polling",
    };
    format!("[{}] {mode:<7} {}", at.format("%H:%M:%S"), board.summary())
}

// ─── Viewer ──────────────────────────────────────────────────────────

pub struct Viewer<R> {
    api: R,
    board: Option<Board>,
    refreshes: u64,
}

impl<R: ReadApi> Viewer<R> {
    pub fn new(api: R) -> Self {
        Self {
            api,
            board: None,
            refreshes: 0,
        }
    }

    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    pub fn refreshes(&self) -> u64 {
        self.refreshes
    }

    /// Re-read the full board and replace the previous one wholesale, so
    /// refreshing twice in a row leaves the same board as refreshing once.
    /// On failure the previous board is kept.
    pub async fn refresh(&mut self) -> Result<&Board, UpstreamError> {
        let (issues, ready, stats, epics) = tokio::try_join!(
            self.api.list_issues(),
            self.api.ready(),
            self.api.stats(),
            self.api.epic_status(),
        )?;
        self.refreshes += 1;
        Ok(&*self.board.insert(Board {
            issues,
            ready,
            stats,
            epics,
        }))
    }
}

// ─── Driver ──────────────────────────────────────────────────────────

/// Run the viewer until `cancel` fires. `on_refresh` sees every freshly
/// read board together with the channel state at the time of the read.
pub async fn run_watch<R, F>(
    api: R,
    url: &str,
    config: ReconnectConfig,
    cancel: CancellationToken,
    mut on_refresh: F,
) -> Viewer<R>
where
    R: ReadApi,
    F: FnMut(&Board, LinkState),
{
    let mut viewer = Viewer::new(api);
    let mut machine = ReconnectMachine::new(config);
    let mut reconnect_at: Option<Instant> = None;
    let mut fallback: Option<Interval> = None;
    let mut conn: Option<PushStream> = None;
    let mut pending: VecDeque<ReconnectAction> = machine.handle(ReconnectInput::Start).into();

    'watch: loop {
        while let Some(action) = pending.pop_front() {
            match action {
                ReconnectAction::ScheduleReconnect(delay) => {
                    reconnect_at = Some(Instant::now() + delay);
                }
                ReconnectAction::OpenConnection => {
                    let attempt = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break 'watch,
                        r = tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(url)) => r,
                    };
                    let input = match attempt {
                        Ok(Ok((ws, _))) => {
                            tracing::info!(url, "push channel connected");
                            conn = Some(ws);
                            ReconnectInput::ConnectSucceeded
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(url, error = %e, "push channel connect failed");
                            ReconnectInput::ConnectFailed
                        }
                        Err(_) => {
                            tracing::debug!(url, "push channel connect timed out");
                            ReconnectInput::ConnectFailed
                        }
                    };
                    pending.extend(machine.handle(input));
                }
                ReconnectAction::StartFallbackPolling(every) => {
                    tracing::info!(every_ms = every.as_millis() as u64, "fallback polling on");
                    let mut ticker = interval_at(Instant::now() + every, every);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    fallback = Some(ticker);
                }
                ReconnectAction::StopFallbackPolling => {
                    tracing::info!("fallback polling off");
                    fallback = None;
                }
                ReconnectAction::RefreshState => match viewer.refresh().await {
                    Ok(board) => on_refresh(board, machine.state()),
                    Err(e) => tracing::warn!(error = %e, "refresh failed, keeping previous board"),
                },
            }
        }

        let input = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'watch,
            _ = wait_until(reconnect_at) => {
                reconnect_at = None;
                ReconnectInput::ReconnectTimerFired
            }
            frame = next_frame(&mut conn) => match frame {
                Some(Ok(Message::Text(_) | Message::Binary(_))) => ReconnectInput::MessageReceived,
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("push channel closed by relay");
                    conn = None;
                    ReconnectInput::ConnectionClosed
                }
                Some(Ok(_)) => continue 'watch,
                Some(Err(e)) => {
                    tracing::info!(error = %e, "push channel lost");
                    conn = None;
                    ReconnectInput::ConnectionClosed
                }
            },
            _ = next_tick(&mut fallback) => ReconnectInput::FallbackTimerFired,
        };
        pending.extend(machine.handle(input));
    }

    if let Some(mut ws) = conn {
        let _ = ws.close(None).await;
    }
    viewer
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn next_frame(conn: &mut Option<PushStream>) -> Option<Result<Message, tungstenite::Error>> {
    match conn {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}
