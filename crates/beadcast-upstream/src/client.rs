//! UDS client for the beads daemon.
//!
//! Connection-per-request, newline-delimited JSON:
//!
//! ```text
//! -> {"operation": "get_mutations", "args": {"since": 0}, "expected_db": "/repo/.beads/beads.db"}
//! <- {"success": true, "data": [...]}
//! ```
//!
//! A fresh connection per call means a restarted daemon is picked up on the
//! next call without any reconnect logic here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use beadcast_core::types::MutationEvent;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use crate::error::UpstreamError;
use crate::source::{ChangeLog, Health, ReadApi, filter_tombstoned_epics};
use crate::translate::translate_batch;

/// Default bound on a single daemon round trip (5 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    operation: &'a str,
    args: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    expected_db: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for one daemon socket.
#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    expected_db: Option<String>,
    config: ClientConfig,
}

impl DaemonClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            expected_db: None,
            config: ClientConfig::default(),
        }
    }

    /// Pin every request to this database. The daemon refuses requests
    /// meant for a different database instead of silently answering them.
    #[must_use]
    pub fn with_database_path(mut self, db: impl Into<String>) -> Self {
        self.expected_db = Some(db.into());
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Database every request is pinned to, if any.
    pub fn database_path(&self) -> Option<&str> {
        self.expected_db.as_deref()
    }

    /// One request/response round trip, bounded by the request timeout.
    pub async fn call(
        &self,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        let timeout = self.config.request_timeout;
        tracing::trace!(operation, socket = %self.socket_path.display(), "daemon request");
        tokio::time::timeout(timeout, self.round_trip(operation, args))
            .await
            .map_err(|_| UpstreamError::Timeout(timeout))?
    }

    async fn round_trip(
        &self,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value, UpstreamError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| UpstreamError::Unavailable {
                socket: self.socket_path.display().to_string(),
                source,
            })?;

        let (reader, mut writer) = stream.into_split();

        let request = RpcRequest {
            operation,
            args,
            expected_db: self.expected_db.as_deref(),
        };
        let mut req = serde_json::to_string(&request)?;
        req.push('\n');
        writer.write_all(req.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(UpstreamError::EmptyResponse);
        }

        let response: RpcResponse = serde_json::from_str(line.trim())?;
        if !response.success {
            return Err(UpstreamError::Rpc {
                operation: operation.to_owned(),
                message: response
                    .error
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| "request failed".to_owned()),
            });
        }

        Ok(response.data.unwrap_or(serde_json::Value::Null))
    }
}

impl ChangeLog for DaemonClient {
    async fn list_changes_since(&self, since_ms: i64) -> Result<Vec<MutationEvent>, UpstreamError> {
        let data = self
            .call("get_mutations", serde_json::json!({ "since": since_ms }))
            .await?;
        translate_batch(data)
    }
}

impl ReadApi for DaemonClient {
    async fn health(&self) -> Result<Health, UpstreamError> {
        let data = self.call("health", serde_json::json!({})).await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn list_issues(&self) -> Result<serde_json::Value, UpstreamError> {
        self.call("list", serde_json::json!({})).await
    }

    async fn show_issue(&self, id: &str) -> Result<serde_json::Value, UpstreamError> {
        self.call("show", serde_json::json!({ "id": id })).await
    }

    async fn ready(&self) -> Result<serde_json::Value, UpstreamError> {
        self.call("ready", serde_json::json!({})).await
    }

    async fn stats(&self) -> Result<serde_json::Value, UpstreamError> {
        self.call("stats", serde_json::json!({})).await
    }

    async fn epic_status(&self) -> Result<serde_json::Value, UpstreamError> {
        let data = self.call("epic_status", serde_json::json!({})).await?;
        Ok(filter_tombstoned_epics(data))
    }
}
