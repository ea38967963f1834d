use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mission::{Mission, MissionStats};
use super::sample::Sample;

/// Durable snapshot of an in-progress session, written on every flush.
/// Enough state to reconstruct or discard the session after a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySnapshot {
    /// The session's mission id. Preserved through any number of
    /// crash/recover cycles so completion updates one record.
    pub mission_id: String,
    pub started_at: DateTime<Utc>,
    pub frequency: String,
    pub period_ms: u64,
    pub samples: Vec<Sample>,
    pub manual_context: Option<String>,
    pub automatic_context: Option<String>,
    /// Recency stamp used for the staleness cutoff at startup.
    pub saved_at: DateTime<Utc>,
}

impl RecoverySnapshot {
    /// Finalize the orphaned buffer as-is, keeping the original id.
    pub fn into_mission(self, name: String, ended_at: DateTime<Utc>) -> Mission {
        let duration_ms = (ended_at - self.started_at).num_milliseconds();
        let stats = MissionStats::from_samples(&self.samples, duration_ms);
        Mission {
            id: self.mission_id,
            name,
            started_at: self.started_at,
            ended_at,
            frequency: self.frequency,
            stats,
            samples: self.samples,
            manual_context: self.manual_context,
            automatic_context: self.automatic_context,
            synced: false,
        }
    }
}
