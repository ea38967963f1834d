mod client;
mod queue;

pub use client::HttpSyncEndpoint;
pub use queue::{
    SyncQueueManager, ATTEMPT_TIMEOUT_SECS, BACKOFF_SCHEDULE_MS, MAX_RETRIES, SYNC_TICK_JITTER_MS,
    SYNC_TICK_SECS,
};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::SyncItem;

/// Retry policy classification for upload failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRetryClass {
    Retryable,
    Permanent,
}

/// Classify an HTTP status into retry behavior.
pub fn classify_http_status(status: u16) -> SyncRetryClass {
    match status {
        408 | 409 | 423 | 425 | 429 => SyncRetryClass::Retryable,
        500..=599 => SyncRetryClass::Retryable,
        _ => SyncRetryClass::Permanent,
    }
}

/// One upload attempt's failure, already classified.
#[derive(Debug, Error)]
pub enum SyncAttemptError {
    #[error("retryable upload failure: {0}")]
    Retryable(String),
    #[error("permanent upload rejection: {0}")]
    Permanent(String),
}

/// Remote backend boundary. Implementations must be idempotent on the item
/// id: re-submitting the same id never creates duplicate remote records.
#[async_trait]
pub trait SyncEndpoint: Send + Sync {
    async fn upload(&self, item: &SyncItem) -> Result<(), SyncAttemptError>;
}
