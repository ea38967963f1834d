//! Startup reconciliation of interrupted sessions.
//!
//! The recovery record is read exactly once per startup and deleted in the
//! same storage round-trip, so no snapshot is ever evaluated twice. Whatever
//! the user then decides, completion always upserts by the original mission
//! id: one logical session ends up as one persisted mission, however many
//! crash cycles preceded it.

use std::sync::Arc;

use chrono::Duration;
use log::{info, warn};

use crate::error::{storage_error, RecorderError};
use crate::models::{MissionInfo, RecoverySnapshot};
use crate::platform::Clock;
use crate::store::Database;
use crate::sync::SyncQueueManager;

/// Snapshots older than this are dropped without surfacing to the user.
pub const STALENESS_HOURS: i64 = 24;

#[derive(Debug)]
pub enum RecoveryOutcome {
    /// Nothing to recover; a new session may start.
    NoOrphan,
    /// A fresh snapshot of an interrupted session awaits a decision:
    /// resume it ([`crate::recording::Recorder::resume`]), save it as-is
    /// ([`RecoveryReconciler::complete`]), or drop it.
    OrphanFound(RecoverySnapshot),
}

pub struct RecoveryReconciler {
    db: Database,
    clock: Arc<dyn Clock>,
    sync: Arc<SyncQueueManager>,
}

impl RecoveryReconciler {
    pub fn new(db: Database, clock: Arc<dyn Clock>, sync: Arc<SyncQueueManager>) -> Self {
        Self { db, clock, sync }
    }

    /// Consume the recovery record, if any. Corrupt or stale records are
    /// discarded here and never block startup.
    pub async fn inspect(&self) -> Result<RecoveryOutcome, RecorderError> {
        let Some(raw) = self
            .db
            .take_recovery_record()
            .await
            .map_err(storage_error)?
        else {
            return Ok(RecoveryOutcome::NoOrphan);
        };

        let snapshot: RecoverySnapshot = match serde_json::from_str(&raw) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("discarding unreadable recovery record: {err}");
                return Ok(RecoveryOutcome::NoOrphan);
            }
        };

        let age = self.clock.wall() - snapshot.saved_at;
        if age > Duration::hours(STALENESS_HOURS) {
            info!(
                "discarding stale recovery record for mission {} ({}h old)",
                snapshot.mission_id,
                age.num_hours()
            );
            return Ok(RecoveryOutcome::NoOrphan);
        }

        info!(
            "found interrupted session: mission {} with {} samples",
            snapshot.mission_id,
            snapshot.samples.len()
        );
        Ok(RecoveryOutcome::OrphanFound(snapshot))
    }

    /// Finalize the orphan as-is under its original id and queue the upload.
    pub async fn complete(
        &self,
        snapshot: RecoverySnapshot,
        name: Option<String>,
    ) -> Result<MissionInfo, RecorderError> {
        let ended_at = snapshot
            .samples
            .last()
            .map(|sample| {
                chrono::DateTime::from_timestamp_millis(sample.timestamp_ms)
                    .unwrap_or_else(|| self.clock.wall())
            })
            .unwrap_or_else(|| self.clock.wall());
        let default_name = format!(
            "Recovered {}",
            snapshot.started_at.format("%Y-%m-%d %H:%M")
        );

        let mission = snapshot.into_mission(name.unwrap_or(default_name), ended_at);
        self.db
            .upsert_mission(&mission)
            .await
            .map_err(storage_error)?;
        self.sync.enqueue_mission(&mission).await?;

        info!(
            "recovered session saved: mission {} with {} measurements",
            mission.id, mission.stats.measurements_count
        );
        Ok(MissionInfo::from(&mission))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ParticulateReadings, Sample};
    use crate::platform::SystemClock;
    use crate::test_support::{manual_sync_manager, temp_database};
    use chrono::Utc;

    fn snapshot(mission_id: &str, saved_at: chrono::DateTime<Utc>) -> RecoverySnapshot {
        RecoverySnapshot {
            mission_id: mission_id.to_string(),
            started_at: saved_at - Duration::minutes(5),
            frequency: "10s".into(),
            period_ms: 10_000,
            samples: vec![Sample {
                timestamp_ms: saved_at.timestamp_millis() - 10_000,
                readings: ParticulateReadings {
                    pm2_5: Some(9.0),
                    ..Default::default()
                },
                device_timestamp_ms: None,
                location: None,
                manual_context: None,
                automatic_context: None,
                weather_ref: None,
            }],
            manual_context: None,
            automatic_context: None,
            saved_at,
        }
    }

    async fn save(db: &Database, snapshot: &RecoverySnapshot) {
        db.save_recovery_record(
            serde_json::to_string(snapshot).unwrap(),
            snapshot.saved_at,
        )
        .await
        .unwrap();
    }

    fn reconciler(db: Database) -> RecoveryReconciler {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let sync = manual_sync_manager(db.clone());
        RecoveryReconciler::new(db, clock, sync)
    }

    #[tokio::test]
    async fn empty_store_means_no_orphan() {
        let reconciler = reconciler(temp_database());
        assert!(matches!(
            reconciler.inspect().await.unwrap(),
            RecoveryOutcome::NoOrphan
        ));
    }

    #[tokio::test]
    async fn the_record_is_consumed_on_first_inspection() {
        let db = temp_database();
        save(&db, &snapshot("m1", Utc::now())).await;
        let reconciler = reconciler(db);

        assert!(matches!(
            reconciler.inspect().await.unwrap(),
            RecoveryOutcome::OrphanFound(_)
        ));
        // Second startup: already consumed.
        assert!(matches!(
            reconciler.inspect().await.unwrap(),
            RecoveryOutcome::NoOrphan
        ));
    }

    #[tokio::test]
    async fn stale_records_are_dropped_silently() {
        let db = temp_database();
        save(&db, &snapshot("m1", Utc::now() - Duration::hours(30))).await;
        let reconciler = reconciler(db);

        assert!(matches!(
            reconciler.inspect().await.unwrap(),
            RecoveryOutcome::NoOrphan
        ));
    }

    #[tokio::test]
    async fn corrupt_records_are_dropped_not_retried() {
        let db = temp_database();
        db.save_recovery_record("{not json".into(), Utc::now())
            .await
            .unwrap();
        let reconciler = reconciler(db);

        assert!(matches!(
            reconciler.inspect().await.unwrap(),
            RecoveryOutcome::NoOrphan
        ));
    }

    #[tokio::test]
    async fn completion_preserves_the_original_mission_id() {
        let db = temp_database();
        save(&db, &snapshot("m1", Utc::now())).await;
        let reconciler = reconciler(db.clone());

        let RecoveryOutcome::OrphanFound(orphan) = reconciler.inspect().await.unwrap() else {
            panic!("expected an orphan");
        };
        let info = reconciler.complete(orphan, None).await.unwrap();
        assert_eq!(info.id, "m1");
        assert_eq!(info.measurements_count, 1);
        assert_eq!(db.count_missions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn repeated_crash_cycles_persist_exactly_one_mission() {
        let db = temp_database();

        // Three interruption/recovery rounds on the same logical session,
        // each saving a new snapshot under the same mission id.
        for round in 0..3 {
            let mut orphan = snapshot("m1", Utc::now());
            orphan.samples[0].readings.pm2_5 = Some(round as f64);
            save(&db, &orphan).await;

            let reconciler = reconciler(db.clone());
            let RecoveryOutcome::OrphanFound(found) = reconciler.inspect().await.unwrap() else {
                panic!("expected an orphan in round {round}");
            };
            reconciler.complete(found, None).await.unwrap();
        }

        assert_eq!(db.count_missions().await.unwrap(), 1);
    }
}
