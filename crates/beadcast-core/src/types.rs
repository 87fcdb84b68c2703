use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Operation ────────────────────────────────────────────────────

/// Kind of change reported by the upstream change log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Created,
    Updated,
    Deleted,
    #[default]
    #[serde(other)]
    Unknown,
}

impl Operation {
    pub const ALL: [Self; 4] = [Self::Created, Self::Updated, Self::Deleted, Self::Unknown];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Unknown => "unknown",
        }
    }

    /// Map an upstream mutation kind onto an operation.
    ///
    /// Accepts both the imperative (`create`) and past-tense (`created`)
    /// spellings, case-insensitively. Anything else is `Unknown`; parsing
    /// never fails so that new upstream kinds still reach viewers.
    pub fn from_kind(kind: &str) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "create" | "created" => Self::Created,
            "update" | "updated" => Self::Updated,
            "delete" | "deleted" => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Mutation Event ───────────────────────────────────────────────

/// A single change to an upstream entity.
///
/// This is also the exact wire shape of every push message:
/// `{"entityId", "entityType", "operation", "timestamp"}` with the timestamp
/// in Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEvent {
    pub entity_id: String,
    pub entity_type: String,
    pub operation: Operation,
    /// Unix milliseconds.
    pub timestamp: i64,
}

/// Entity type used when the upstream record does not carry one.
pub const DEFAULT_ENTITY_TYPE: &str = "issue";

impl MutationEvent {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        operation: Operation,
        timestamp: i64,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            operation,
            timestamp,
        }
    }

    /// Serialize to the push-channel payload.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for MutationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @{}",
            self.entity_type, self.entity_id, self.operation, self.timestamp
        )
    }
}
