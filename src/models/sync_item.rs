use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncItemKind {
    Mission,
    MeasurementBatch,
}

impl SyncItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncItemKind::Mission => "Mission",
            SyncItemKind::MeasurementBatch => "MeasurementBatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncItemState {
    /// Eligible for automatic processing once its backoff gate elapses.
    Pending,
    /// Out of automatic retries (or permanently rejected). Stays visible
    /// and manually retryable; never silently dropped.
    Failed,
}

impl SyncItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncItemState::Pending => "Pending",
            SyncItemState::Failed => "Failed",
        }
    }
}

/// One outbound upload wrapped with its retry bookkeeping. The id doubles as
/// the remote idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
    pub id: String,
    pub kind: SyncItemKind,
    pub payload: serde_json::Value,
    pub state: SyncItemState,
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}
