//! Seams to the upstream data source. Enables fake injection for testing.

use std::future::Future;

use beadcast_core::types::MutationEvent;
use serde::{Deserialize, Serialize};

use crate::error::UpstreamError;

/// Pull access to the upstream change log.
pub trait ChangeLog: Send + Sync {
    /// Mutations recorded after `since_ms` (Unix millis), in upstream order.
    fn list_changes_since(
        &self,
        since_ms: i64,
    ) -> impl Future<Output = Result<Vec<MutationEvent>, UpstreamError>> + Send;
}

/// Direct read queries. Payloads stay opaque JSON; rendering them is the
/// viewer's business.
pub trait ReadApi: Send + Sync {
    fn health(&self) -> impl Future<Output = Result<Health, UpstreamError>> + Send;

    fn list_issues(
        &self,
    ) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;

    fn show_issue(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;

    fn ready(&self) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;

    fn stats(&self) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;

    /// Epics with child counts. Tombstoned epics are not returned.
    fn epic_status(
        &self,
    ) -> impl Future<Output = Result<serde_json::Value, UpstreamError>> + Send;
}

impl<T: ChangeLog + ?Sized> ChangeLog for std::sync::Arc<T> {
    fn list_changes_since(
        &self,
        since_ms: i64,
    ) -> impl Future<Output = Result<Vec<MutationEvent>, UpstreamError>> + Send {
        (**self).list_changes_since(since_ms)
    }
}

// ─── Health ──────────────────────────────────────────────────────────

/// Daemon health report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub version: String,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Drop epic entries that are missing their epic or whose epic is tombstoned.
pub fn filter_tombstoned_epics(data: serde_json::Value) -> serde_json::Value {
    match data {
        serde_json::Value::Array(entries) => serde_json::Value::Array(
            entries
                .into_iter()
                .filter(|entry| {
                    let epic = &entry["epic"];
                    !epic.is_null() && epic["status"].as_str() != Some("tombstone")
                })
                .collect(),
        ),
        serde_json::Value::Null => serde_json::Value::Array(Vec::new()),
        other => other,
    }
}
