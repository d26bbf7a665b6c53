//! Units of work carried by the pipelines

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single record to delete on behalf of its owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    /// Short URL id of the record
    pub record_id: String,
    /// User that owns the record
    pub owner_id: String,
}

impl Task {
    pub fn new(record_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            owner_id: owner_id.into(),
        }
    }
}

/// A user's request to delete several of their records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    pub owner_id: String,
    pub record_ids: Vec<String>,
}

impl DeletionRequest {
    pub fn new(owner_id: impl Into<String>, record_ids: Vec<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            record_ids,
        }
    }

    /// Number of tasks this request expands into
    pub fn len(&self) -> usize {
        self.record_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.record_ids.is_empty()
    }

    /// Expand into one [`Task`] per record id, keeping the request order
    pub fn into_tasks(self) -> impl Iterator<Item = Task> {
        let owner_id = self.owner_id;
        self.record_ids
            .into_iter()
            .map(move |record_id| Task::new(record_id, owner_id.clone()))
    }
}

/// What the user did to produce an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    /// A URL was shortened
    Shorten,
    /// A short URL was followed
    Follow,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shorten => write!(f, "shorten"),
            Self::Follow => write!(f, "follow"),
        }
    }
}

/// One audit record
///
/// Serialized as `{"ts": .., "action": .., "user_id": .., "url": ..}`, the
/// format external audit collectors already consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unix timestamp in seconds
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub action: AuditAction,
    #[serde(rename = "user_id")]
    pub owner_id: String,
    #[serde(rename = "url")]
    pub original_url: String,
}

impl AuditEvent {
    /// Create an event stamped with the current time
    pub fn now(
        action: AuditAction,
        owner_id: impl Into<String>,
        original_url: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            action,
            owner_id: owner_id.into(),
            original_url: original_url.into(),
        }
    }
}
