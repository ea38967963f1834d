use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Duration as ChronoDuration;
use log::{debug, info, warn};
use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{storage_error, RecorderError};
use crate::models::{Mission, SyncItem, SyncItemKind, SyncItemState};
use crate::platform::Clock;
use crate::store::Database;

use super::{SyncAttemptError, SyncEndpoint};

/// Background pass cadence.
pub const SYNC_TICK_SECS: u64 = 30;
/// Jitter added to each cycle so fleets of devices spread their uploads.
/// Per-item backoff stays exact.
pub const SYNC_TICK_JITTER_MS: u64 = 5_000;
/// Retry gate per attempt, indexed by `min(retry_count, len - 1)`.
pub const BACKOFF_SCHEDULE_MS: [i64; 5] = [1_000, 2_000, 5_000, 10_000, 30_000];
/// Automatic attempts per item before it parks as failed.
pub const MAX_RETRIES: u32 = 5;
/// Per-attempt network budget so a hung request cannot starve the pass.
pub const ATTEMPT_TIMEOUT_SECS: u64 = 30;

pub fn backoff_delay_ms(retry_count: u32) -> i64 {
    let index = (retry_count as usize).min(BACKOFF_SCHEDULE_MS.len() - 1);
    BACKOFF_SCHEDULE_MS[index]
}

struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Durable outbound queue with bounded backoff. Items park as failed after
/// the retry ceiling instead of being dropped, and stay manually retryable.
pub struct SyncQueueManager {
    db: Database,
    clock: Arc<dyn Clock>,
    endpoint: Arc<dyn SyncEndpoint>,
    connectivity: watch::Receiver<bool>,
    is_processing: AtomicBool,
    worker: StdMutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl SyncQueueManager {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        endpoint: Arc<dyn SyncEndpoint>,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            clock,
            endpoint,
            connectivity,
            is_processing: AtomicBool::new(false),
            worker: StdMutex::new(None),
        }
    }

    /// Queue a mission upload, keyed by the mission id. Re-enqueueing the
    /// same mission refreshes the payload without touching retry state.
    pub async fn enqueue_mission(&self, mission: &Mission) -> Result<(), RecorderError> {
        let item = SyncItem {
            id: mission.id.clone(),
            kind: SyncItemKind::Mission,
            payload: serde_json::to_value(mission)
                .map_err(|err| RecorderError::Storage(err.into()))?,
            state: SyncItemState::Pending,
            retry_count: 0,
            enqueued_at: self.clock.wall(),
            last_attempt_at: None,
        };
        self.enqueue(item).await
    }

    pub async fn enqueue(&self, item: SyncItem) -> Result<(), RecorderError> {
        self.db.upsert_sync_item(&item).await.map_err(storage_error)
    }

    /// Run one pass over eligible pending items. No-op while offline or
    /// while another pass is in flight.
    pub async fn process_pending(&self) -> Result<(), RecorderError> {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            debug!("sync pass already in flight; skipping");
            return Ok(());
        }
        let _guard = PassGuard(&self.is_processing);

        if !*self.connectivity.borrow() {
            debug!("offline; skipping sync pass");
            return Ok(());
        }

        let items = self
            .db
            .list_sync_items(SyncItemState::Pending)
            .await
            .map_err(storage_error)?;
        let now = self.clock.wall();

        for item in items {
            if !backoff_elapsed(&item, now) {
                continue;
            }
            // One item's failure never halts the rest of the pass.
            self.attempt(item).await;
        }
        Ok(())
    }

    pub async fn list_failed(&self) -> Result<Vec<SyncItem>, RecorderError> {
        self.db
            .list_sync_items(SyncItemState::Failed)
            .await
            .map_err(storage_error)
    }

    /// Re-attempt one item immediately, ignoring the elapsed-time gate and
    /// the failed state. Returns false when the id is unknown.
    pub async fn retry_now(&self, item_id: &str) -> Result<bool, RecorderError> {
        let Some(item) = self
            .db
            .get_sync_item(item_id)
            .await
            .map_err(storage_error)?
        else {
            return Ok(false);
        };
        self.attempt(item).await;
        Ok(true)
    }

    async fn attempt(&self, item: SyncItem) {
        let outcome = tokio::time::timeout(
            Duration::from_secs(ATTEMPT_TIMEOUT_SECS),
            self.endpoint.upload(&item),
        )
        .await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(SyncAttemptError::Retryable("attempt timed out".into())),
        };
        let attempted_at = self.clock.wall();

        match result {
            Ok(()) => {
                info!("synced {} {}", item.kind.as_str(), item.id);
                if let Err(err) = self.db.delete_sync_item(&item.id).await {
                    warn!("failed to remove synced item {}: {err:#}", item.id);
                }
                if item.kind == SyncItemKind::Mission {
                    if let Err(err) = self.db.mark_mission_synced(&item.id, attempted_at).await {
                        warn!("failed to mark mission {} synced: {err:#}", item.id);
                    }
                }
            }
            Err(SyncAttemptError::Permanent(reason)) => {
                warn!("upload of {} rejected permanently: {reason}", item.id);
                self.record_failure(&item, SyncItemState::Failed, attempted_at)
                    .await;
            }
            Err(SyncAttemptError::Retryable(reason)) => {
                let retries = item.retry_count + 1;
                let state = if retries >= MAX_RETRIES {
                    warn!(
                        "upload of {} failed {retries} times; parking as failed: {reason}",
                        item.id
                    );
                    SyncItemState::Failed
                } else {
                    debug!(
                        "upload of {} failed (attempt {retries}), next retry in {}ms: {reason}",
                        item.id,
                        backoff_delay_ms(retries)
                    );
                    SyncItemState::Pending
                };
                self.record_failure(&item, state, attempted_at).await;
            }
        }
    }

    async fn record_failure(
        &self,
        item: &SyncItem,
        state: SyncItemState,
        attempted_at: chrono::DateTime<chrono::Utc>,
    ) {
        if let Err(err) = self
            .db
            .record_sync_attempt(&item.id, item.retry_count + 1, state, attempted_at)
            .await
        {
            warn!("failed to record sync attempt for {}: {err:#}", item.id);
        }
    }

    /// Spawn the periodic pass, plus an immediate pass on each
    /// offline-to-online transition.
    pub fn spawn_worker(self: &Arc<Self>) {
        let mut guard = self.worker.lock().unwrap();
        if guard.is_some() {
            return;
        }

        let manager = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut connectivity = manager.connectivity.clone();
            let mut connectivity_open = true;
            let mut online = *connectivity.borrow();

            loop {
                let jitter = rand::thread_rng().gen_range(0..=SYNC_TICK_JITTER_MS);
                let wait = Duration::from_secs(SYNC_TICK_SECS) + Duration::from_millis(jitter);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        if let Err(err) = manager.process_pending().await {
                            warn!("periodic sync pass failed: {err}");
                        }
                    }
                    changed = connectivity.changed(), if connectivity_open => {
                        match changed {
                            Err(_) => connectivity_open = false,
                            Ok(()) => {
                                let now_online = *connectivity.borrow();
                                if now_online && !online {
                                    info!("connectivity restored; draining sync queue");
                                    if let Err(err) = manager.process_pending().await {
                                        warn!("post-reconnect sync pass failed: {err}");
                                    }
                                }
                                online = now_online;
                            }
                        }
                    }
                }
            }
        });

        *guard = Some((cancel, handle));
    }

    pub async fn shutdown(&self) {
        let taken = self.worker.lock().unwrap().take();
        if let Some((cancel, handle)) = taken {
            cancel.cancel();
            let _ = handle.await;
        }
    }
}

fn backoff_elapsed(item: &SyncItem, now: chrono::DateTime<chrono::Utc>) -> bool {
    match item.last_attempt_at {
        None => true,
        Some(at) => now - at >= ChronoDuration::milliseconds(backoff_delay_ms(item.retry_count)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{temp_database, FakeClock};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedEndpoint {
        attempts: AtomicUsize,
        succeed: AtomicBool,
    }

    impl ScriptedEndpoint {
        fn failing() -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicUsize::new(0),
                succeed: AtomicBool::new(false),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncEndpoint for ScriptedEndpoint {
        async fn upload(&self, _item: &SyncItem) -> Result<(), SyncAttemptError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.succeed.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(SyncAttemptError::Retryable("503 from backend".into()))
            }
        }
    }

    fn item(id: &str) -> SyncItem {
        SyncItem {
            id: id.to_string(),
            kind: SyncItemKind::MeasurementBatch,
            payload: serde_json::json!({"values": [1, 2, 3]}),
            state: SyncItemState::Pending,
            retry_count: 0,
            enqueued_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    fn manager(
        endpoint: Arc<ScriptedEndpoint>,
        online: bool,
    ) -> (Arc<SyncQueueManager>, Arc<FakeClock>) {
        let clock = Arc::new(FakeClock::new());
        let clock_for_manager: Arc<dyn Clock> = clock.clone();
        let (_tx, rx) = watch::channel(online);
        let manager = Arc::new(SyncQueueManager::new(
            temp_database(),
            clock_for_manager,
            endpoint,
            rx,
        ));
        (manager, clock)
    }

    #[tokio::test]
    async fn offline_pass_is_a_no_op() {
        let endpoint = ScriptedEndpoint::failing();
        let (manager, _clock) = manager(Arc::clone(&endpoint), false);

        manager.enqueue(item("i1")).await.unwrap();
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), 0);
    }

    #[tokio::test]
    async fn attempts_follow_the_backoff_schedule() {
        let endpoint = ScriptedEndpoint::failing();
        let (manager, clock) = manager(Arc::clone(&endpoint), true);

        manager.enqueue(item("i1")).await.unwrap();

        // First attempt is immediate.
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), 1);

        // Gate for attempt 2 is schedule[1].
        clock.advance_ms(BACKOFF_SCHEDULE_MS[1] - 1);
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), 1);
        clock.advance_ms(1);
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), 2);

        // Gate for attempt 3 is schedule[2].
        clock.advance_ms(BACKOFF_SCHEDULE_MS[2]);
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), 3);

        // After the 3rd failure the 4th attempt waits schedule[3], no less.
        clock.advance_ms(BACKOFF_SCHEDULE_MS[3] - 1);
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), 3);
        clock.advance_ms(1);
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), 4);
    }

    #[tokio::test]
    async fn exhausted_items_park_as_failed_but_stay_retryable() {
        let endpoint = ScriptedEndpoint::failing();
        let (manager, clock) = manager(Arc::clone(&endpoint), true);

        manager.enqueue(item("i1")).await.unwrap();
        for _ in 0..MAX_RETRIES {
            manager.process_pending().await.unwrap();
            clock.advance_ms(BACKOFF_SCHEDULE_MS[4]);
        }
        assert_eq!(endpoint.attempts(), MAX_RETRIES as usize);

        // Out of automatic retries: further passes skip it.
        manager.process_pending().await.unwrap();
        assert_eq!(endpoint.attempts(), MAX_RETRIES as usize);

        let failed = manager.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, "i1");

        // Manual retry ignores the gate and the parked state.
        assert!(manager.retry_now("i1").await.unwrap());
        assert_eq!(endpoint.attempts(), MAX_RETRIES as usize + 1);

        // And succeeds once the backend recovers.
        endpoint.succeed.store(true, Ordering::SeqCst);
        assert!(manager.retry_now("i1").await.unwrap());
        assert!(manager.list_failed().await.unwrap().is_empty());
        assert!(!manager.retry_now("i1").await.unwrap());
    }

    #[tokio::test]
    async fn re_enqueueing_keeps_retry_bookkeeping() {
        let endpoint = ScriptedEndpoint::failing();
        let (manager, _clock) = manager(Arc::clone(&endpoint), true);

        manager.enqueue(item("i1")).await.unwrap();
        manager.process_pending().await.unwrap();

        // Fresh payload for the same id: retry count survives.
        manager.enqueue(item("i1")).await.unwrap();
        let stored = manager.db.get_sync_item("i1").await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 1);
        assert!(stored.last_attempt_at.is_some());
    }
}
