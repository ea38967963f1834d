use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::Mutex;

use crate::error::{is_storage_full, RecorderError};
use crate::models::{Mission, MissionStats, RecoverySnapshot, Sample};
use crate::platform::Clock;
use crate::store::Database;

/// Session-scope metadata fixed when the buffer opens.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub mission_id: String,
    pub started_at: DateTime<Utc>,
    pub frequency: String,
    pub period_ms: u64,
    pub manual_context: Option<String>,
    pub automatic_context: Option<String>,
}

struct ActiveSession {
    meta: SessionMeta,
    samples: Vec<Sample>,
}

impl ActiveSession {
    fn snapshot(&self, saved_at: DateTime<Utc>) -> RecoverySnapshot {
        RecoverySnapshot {
            mission_id: self.meta.mission_id.clone(),
            started_at: self.meta.started_at,
            frequency: self.meta.frequency.clone(),
            period_ms: self.meta.period_ms,
            samples: self.samples.clone(),
            manual_context: self.meta.manual_context.clone(),
            automatic_context: self.meta.automatic_context.clone(),
            saved_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// Duplicate-callback guard fired; the sample was not stored.
    DuplicateSuppressed,
    /// Stored in memory but the durable snapshot write failed; the next
    /// append or flush retries it.
    AppendedNotPersisted { storage_full: bool },
}

/// Append-only log for the active session. All state sits behind one async
/// mutex: flushes hold the guard across their persist await, so an append
/// can never interleave with snapshot serialization.
pub struct RecordingBuffer {
    db: Database,
    clock: Arc<dyn Clock>,
    state: Mutex<Option<ActiveSession>>,
}

impl RecordingBuffer {
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            state: Mutex::new(None),
        }
    }

    pub async fn open(&self, meta: SessionMeta) -> Result<(), RecorderError> {
        self.open_with_samples(meta, Vec::new()).await
    }

    /// Open seeded with recovered samples, keeping the original mission id.
    pub async fn open_with_samples(
        &self,
        meta: SessionMeta,
        samples: Vec<Sample>,
    ) -> Result<(), RecorderError> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(RecorderError::AlreadyRecording);
        }
        *state = Some(ActiveSession { meta, samples });
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub async fn active_mission_id(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|session| session.meta.mission_id.clone())
    }

    /// Append one sample and persist the updated snapshot, so at most one
    /// sample is at risk if the process dies between ticks. A failed durable
    /// write keeps the sample in memory and reports the outcome.
    pub async fn append(&self, sample: Sample) -> Result<AppendOutcome, RecorderError> {
        let mut state = self.state.lock().await;
        let session = state.as_mut().ok_or(RecorderError::NotRecording)?;

        if let Some(last) = session.samples.last() {
            if sample.duplicates(last) {
                debug!(
                    "suppressed duplicate sample at {} for mission {}",
                    sample.timestamp_ms, session.meta.mission_id
                );
                return Ok(AppendOutcome::DuplicateSuppressed);
            }
        }

        session.samples.push(sample);

        let snapshot = session.snapshot(self.clock.wall());
        let mission_id = session.meta.mission_id.clone();
        let sample_index = session.samples.len() - 1;
        match self.persist_snapshot(&snapshot).await {
            Ok(()) => Ok(AppendOutcome::Appended),
            Err(err) => {
                let storage_full = is_storage_full(&err);
                warn!(
                    "durable write failed for mission {mission_id} sample {sample_index} \
                     (kept in memory): {err:#}"
                );
                Ok(AppendOutcome::AppendedNotPersisted { storage_full })
            }
        }
    }

    /// Attach a late enrichment reference to the sample captured at
    /// `timestamp_ms`. Returns false when the session already closed or the
    /// sample is gone; the reference is dropped in that case.
    pub async fn attach_weather_ref(&self, timestamp_ms: i64, weather_ref: String) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = state.as_mut() else {
            return false;
        };
        let Some(sample) = session
            .samples
            .iter_mut()
            .rev()
            .find(|sample| sample.timestamp_ms == timestamp_ms)
        else {
            return false;
        };
        sample.weather_ref = Some(weather_ref);
        true
    }

    /// Write the current snapshot to durable storage. Idempotent: an
    /// unchanged buffer rewrites the same snapshot. Holds the state guard
    /// across the write.
    pub async fn flush(&self) -> Result<(), RecorderError> {
        let state = self.state.lock().await;
        let Some(session) = state.as_ref() else {
            return Ok(());
        };
        let snapshot = session.snapshot(self.clock.wall());
        self.persist_snapshot(&snapshot)
            .await
            .map_err(crate::error::storage_error)
    }

    /// Close the session and produce the immutable mission aggregate.
    pub async fn finalize(&self, name: String) -> Result<Mission, RecorderError> {
        let mut state = self.state.lock().await;
        let session = state.take().ok_or(RecorderError::NotRecording)?;

        let ended_at = self.clock.wall();
        let duration_ms = (ended_at - session.meta.started_at).num_milliseconds();
        let stats = MissionStats::from_samples(&session.samples, duration_ms);

        Ok(Mission {
            id: session.meta.mission_id,
            name,
            started_at: session.meta.started_at,
            ended_at,
            frequency: session.meta.frequency,
            stats,
            samples: session.samples,
            manual_context: session.meta.manual_context,
            automatic_context: session.meta.automatic_context,
            synced: false,
        })
    }

    /// Drop the session without producing a mission.
    pub async fn discard(&self) -> Result<(), RecorderError> {
        let mut state = self.state.lock().await;
        state.take().ok_or(RecorderError::NotRecording)?;
        Ok(())
    }

    async fn persist_snapshot(&self, snapshot: &RecoverySnapshot) -> anyhow::Result<()> {
        let payload = serde_json::to_string(snapshot)?;
        self.db.save_recovery_record(payload, snapshot.saved_at).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParticulateReadings;
    use crate::platform::SystemClock;
    use crate::test_support::temp_database;

    fn meta(mission_id: &str) -> SessionMeta {
        SessionMeta {
            mission_id: mission_id.to_string(),
            started_at: Utc::now(),
            frequency: "10s".into(),
            period_ms: 10_000,
            manual_context: Some("commute".into()),
            automatic_context: None,
        }
    }

    fn sample(timestamp_ms: i64, pm2_5: f64) -> Sample {
        Sample {
            timestamp_ms,
            readings: ParticulateReadings {
                pm2_5: Some(pm2_5),
                ..Default::default()
            },
            device_timestamp_ms: None,
            location: None,
            manual_context: None,
            automatic_context: None,
            weather_ref: None,
        }
    }

    fn buffer() -> RecordingBuffer {
        RecordingBuffer::new(temp_database(), Arc::new(SystemClock::new()))
    }

    #[tokio::test]
    async fn append_requires_an_open_session() {
        let buffer = buffer();
        let result = buffer.append(sample(0, 1.0)).await;
        assert!(matches!(result, Err(RecorderError::NotRecording)));
    }

    #[tokio::test]
    async fn only_one_session_may_be_open() {
        let buffer = buffer();
        buffer.open(meta("m1")).await.unwrap();
        let second = buffer.open(meta("m2")).await;
        assert!(matches!(second, Err(RecorderError::AlreadyRecording)));
    }

    #[tokio::test]
    async fn duplicate_guard_suppresses_double_callbacks_only() {
        let buffer = buffer();
        buffer.open(meta("m1")).await.unwrap();

        assert_eq!(
            buffer.append(sample(1_000, 12.5)).await.unwrap(),
            AppendOutcome::Appended
        );
        // Same value 100ms later: duplicated callback.
        assert_eq!(
            buffer.append(sample(1_100, 12.5)).await.unwrap(),
            AppendOutcome::DuplicateSuppressed
        );
        // Same value a full period later: legitimate repeat.
        assert_eq!(
            buffer.append(sample(3_000, 12.5)).await.unwrap(),
            AppendOutcome::Appended
        );

        let mission = buffer.finalize("test".into()).await.unwrap();
        assert_eq!(mission.stats.measurements_count, 2);
    }

    #[tokio::test]
    async fn finalize_preserves_the_session_mission_id() {
        let buffer = buffer();
        buffer.open(meta("m1")).await.unwrap();
        buffer.append(sample(0, 5.0)).await.unwrap();
        let mission = buffer.finalize("test".into()).await.unwrap();
        assert_eq!(mission.id, "m1");
        assert!(!buffer.is_active().await);
    }

    #[tokio::test]
    async fn enrichment_attaches_only_while_the_session_is_open() {
        let buffer = buffer();
        buffer.open(meta("m1")).await.unwrap();
        buffer.append(sample(0, 5.0)).await.unwrap();

        assert!(buffer.attach_weather_ref(0, "wx-1".into()).await);

        let mission = buffer.finalize("test".into()).await.unwrap();
        assert_eq!(mission.samples[0].weather_ref.as_deref(), Some("wx-1"));

        // Session closed: the late reference is dropped.
        assert!(!buffer.attach_weather_ref(0, "wx-2".into()).await);
    }

    #[tokio::test]
    async fn flush_is_idempotent() {
        let buffer = buffer();
        buffer.open(meta("m1")).await.unwrap();
        buffer.append(sample(0, 5.0)).await.unwrap();

        buffer.flush().await.unwrap();
        buffer.flush().await.unwrap();

        let mission = buffer.finalize("test".into()).await.unwrap();
        assert_eq!(mission.stats.measurements_count, 1);
    }
}
