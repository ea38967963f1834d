use std::sync::Arc;

use log::{error, info};
use uuid::Uuid;

use crate::error::{storage_error, RecorderError};
use crate::interruption::{InterruptionDetector, Subscription};
use crate::models::{MissionInfo, RecoverySnapshot};
use crate::platform::Clock;
use crate::scheduler::{SchedulerRegistry, TickCallback};
use crate::settings::parse_frequency;
use crate::store::Database;
use crate::sync::SyncQueueManager;

use super::buffer::{RecordingBuffer, SessionMeta};
use super::sampler::{ContextLabels, Sampler};

const RECORDING_SCHEDULER_ID: &str = "recording";

/// Drives one recording session end to end: opens the buffer, starts the
/// periodic trigger, keeps the interruption detector's recording flag in
/// step, and on stop finalizes the mission and hands it to the sync queue.
pub struct Recorder {
    db: Database,
    clock: Arc<dyn Clock>,
    buffer: Arc<RecordingBuffer>,
    sampler: Arc<Sampler>,
    schedulers: Arc<SchedulerRegistry>,
    sync: Arc<SyncQueueManager>,
    detector: Arc<InterruptionDetector>,
    _flush_subscription: Subscription,
}

impl Recorder {
    pub fn new(
        db: Database,
        clock: Arc<dyn Clock>,
        buffer: Arc<RecordingBuffer>,
        sampler: Arc<Sampler>,
        schedulers: Arc<SchedulerRegistry>,
        sync: Arc<SyncQueueManager>,
        detector: Arc<InterruptionDetector>,
    ) -> Self {
        // Emergency flush: registered once for the process lifetime; the
        // event's recording flag gates the actual work.
        let flush_buffer = Arc::clone(&buffer);
        let flush_subscription = detector.subscribe(Arc::new(move |event| {
            let buffer = Arc::clone(&flush_buffer);
            Box::pin(async move {
                if !event.was_recording {
                    return;
                }
                if let Err(err) = buffer.flush().await {
                    error!("emergency flush after {:?} failed: {err}", event.kind);
                }
            })
        }));

        Self {
            db,
            clock,
            buffer,
            sampler,
            schedulers,
            sync,
            detector,
            _flush_subscription: flush_subscription,
        }
    }

    pub async fn start(
        &self,
        frequency: &str,
        context: ContextLabels,
    ) -> Result<String, RecorderError> {
        let period_ms = parse_frequency(frequency)?;
        let meta = SessionMeta {
            mission_id: Uuid::new_v4().to_string(),
            started_at: self.clock.wall(),
            frequency: frequency.to_string(),
            period_ms,
            manual_context: context.manual.clone(),
            automatic_context: context.automatic.clone(),
        };
        let mission_id = meta.mission_id.clone();

        self.buffer.open(meta).await?;
        self.begin_session(period_ms, context).await;

        info!("recording started: mission {mission_id} at {frequency}");
        Ok(mission_id)
    }

    /// Re-open an interrupted session from its recovery snapshot. New
    /// samples append under the original mission id.
    pub async fn resume(&self, snapshot: RecoverySnapshot) -> Result<String, RecorderError> {
        let meta = SessionMeta {
            mission_id: snapshot.mission_id.clone(),
            started_at: snapshot.started_at,
            frequency: snapshot.frequency.clone(),
            period_ms: snapshot.period_ms,
            manual_context: snapshot.manual_context.clone(),
            automatic_context: snapshot.automatic_context.clone(),
        };
        let mission_id = meta.mission_id.clone();
        let period_ms = meta.period_ms;
        let context = ContextLabels {
            manual: snapshot.manual_context.clone(),
            automatic: snapshot.automatic_context.clone(),
        };

        self.buffer.open_with_samples(meta, snapshot.samples).await?;
        self.begin_session(period_ms, context).await;

        info!(
            "recording resumed: mission {mission_id} continues after interruption"
        );
        Ok(mission_id)
    }

    async fn begin_session(&self, period_ms: u64, context: ContextLabels) {
        self.sampler.set_context(context);
        self.detector.set_recording_active(true);

        let sampler = Arc::clone(&self.sampler);
        let callback: TickCallback = Arc::new(move |tick| {
            let sampler = Arc::clone(&sampler);
            Box::pin(async move {
                sampler.capture(tick.timestamp_ms).await;
            })
        });
        self.schedulers
            .start(RECORDING_SCHEDULER_ID, period_ms, callback)
            .await;
    }

    /// Stop cleanly: finalize the buffer into a mission, persist it, clear
    /// the recovery snapshot, and queue the upload.
    pub async fn stop(&self, name: Option<String>) -> Result<MissionInfo, RecorderError> {
        self.schedulers.stop(RECORDING_SCHEDULER_ID).await;
        self.detector.set_recording_active(false);

        let default_name = format!(
            "Recording {}",
            self.clock.wall().format("%Y-%m-%d %H:%M")
        );
        let mission = self.buffer.finalize(name.unwrap_or(default_name)).await?;

        self.db
            .upsert_mission(&mission)
            .await
            .map_err(storage_error)?;
        self.db
            .delete_recovery_record()
            .await
            .map_err(storage_error)?;
        self.sync.enqueue_mission(&mission).await?;

        info!(
            "recording stopped: mission {} with {} measurements",
            mission.id, mission.stats.measurements_count
        );
        Ok(MissionInfo::from(&mission))
    }

    /// Abort without producing a mission.
    pub async fn discard(&self) -> Result<(), RecorderError> {
        self.schedulers.stop(RECORDING_SCHEDULER_ID).await;
        self.detector.set_recording_active(false);

        self.buffer.discard().await?;
        self.db
            .delete_recovery_record()
            .await
            .map_err(storage_error)?;
        info!("recording discarded");
        Ok(())
    }

    pub async fn is_recording(&self) -> bool {
        self.buffer.is_active().await
    }

    pub async fn active_mission_id(&self) -> Option<String> {
        self.buffer.active_mission_id().await
    }

    pub fn set_context(&self, labels: ContextLabels) {
        self.sampler.set_context(labels);
    }
}
