//! Shared fakes for unit tests.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::models::SyncItem;
use crate::platform::Clock;
use crate::store::Database;
use crate::sync::{SyncAttemptError, SyncEndpoint, SyncQueueManager};

pub(crate) fn temp_database() -> Database {
    let path = std::env::temp_dir().join(format!(
        "airtrace-test-{}.sqlite3",
        uuid::Uuid::new_v4()
    ));
    Database::new(path).expect("failed to open test database")
}

/// Manually advanced clock; monotonic and wall lanes move together.
pub(crate) struct FakeClock {
    base_wall: DateTime<Utc>,
    offset_ms: AtomicI64,
}

impl FakeClock {
    pub(crate) fn new() -> Self {
        Self {
            base_wall: Utc::now(),
            offset_ms: AtomicI64::new(0),
        }
    }

    pub(crate) fn advance_ms(&self, delta: i64) {
        self.offset_ms.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn monotonic_ms(&self) -> u64 {
        self.offset_ms.load(Ordering::SeqCst).max(0) as u64
    }

    fn wall(&self) -> DateTime<Utc> {
        self.base_wall + Duration::milliseconds(self.offset_ms.load(Ordering::SeqCst))
    }
}

pub(crate) struct NullEndpoint;

#[async_trait]
impl SyncEndpoint for NullEndpoint {
    async fn upload(&self, _item: &SyncItem) -> Result<(), SyncAttemptError> {
        Ok(())
    }
}

/// A queue manager with no background worker and no connectivity, for tests
/// that only need enqueueing.
pub(crate) fn manual_sync_manager(db: Database) -> Arc<SyncQueueManager> {
    let (_tx, rx) = watch::channel(false);
    Arc::new(SyncQueueManager::new(
        db,
        Arc::new(crate::platform::SystemClock::new()),
        Arc::new(NullEndpoint),
        rx,
    ))
}
