use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::sample::Sample;

/// Derived per-channel statistics. Means are arithmetic over non-null values;
/// an empty channel yields 0.0 rather than NaN.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionStats {
    pub pm1_avg: f64,
    pub pm1_max: f64,
    pub pm2_5_avg: f64,
    pub pm2_5_max: f64,
    pub pm10_avg: f64,
    pub pm10_max: f64,
    pub measurements_count: u64,
    pub duration_ms: i64,
}

fn channel_stats<F>(samples: &[Sample], select: F) -> (f64, f64)
where
    F: Fn(&Sample) -> Option<f64>,
{
    let mut sum = 0.0;
    let mut count = 0u64;
    let mut max = f64::NEG_INFINITY;
    for sample in samples {
        if let Some(value) = select(sample) {
            sum += value;
            count += 1;
            if value > max {
                max = value;
            }
        }
    }
    if count == 0 {
        (0.0, 0.0)
    } else {
        (sum / count as f64, max)
    }
}

impl MissionStats {
    pub fn from_samples(samples: &[Sample], duration_ms: i64) -> Self {
        let (pm1_avg, pm1_max) = channel_stats(samples, |s| s.readings.pm1);
        let (pm2_5_avg, pm2_5_max) = channel_stats(samples, |s| s.readings.pm2_5);
        let (pm10_avg, pm10_max) = channel_stats(samples, |s| s.readings.pm10);
        Self {
            pm1_avg,
            pm1_max,
            pm2_5_avg,
            pm2_5_max,
            pm10_avg,
            pm10_max,
            measurements_count: samples.len() as u64,
            duration_ms: duration_ms.max(0),
        }
    }
}

/// The finalized aggregate for one recording session. Immutable once saved;
/// the id is generated when the session opens and survives recovery merges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub frequency: String,
    pub stats: MissionStats,
    pub samples: Vec<Sample>,
    pub manual_context: Option<String>,
    pub automatic_context: Option<String>,
    pub synced: bool,
}

/// Listing row without the sample payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionInfo {
    pub id: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub measurements_count: u64,
    pub synced: bool,
}

impl From<&Mission> for MissionInfo {
    fn from(mission: &Mission) -> Self {
        Self {
            id: mission.id.clone(),
            name: mission.name.clone(),
            started_at: mission.started_at,
            ended_at: mission.ended_at,
            measurements_count: mission.stats.measurements_count,
            synced: mission.synced,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParticulateReadings;

    fn sample(pm2_5: Option<f64>, pm10: Option<f64>) -> Sample {
        Sample {
            timestamp_ms: 0,
            readings: ParticulateReadings {
                pm2_5,
                pm10,
                ..Default::default()
            },
            device_timestamp_ms: None,
            location: None,
            manual_context: None,
            automatic_context: None,
            weather_ref: None,
        }
    }

    #[test]
    fn stats_average_over_non_null_values_only() {
        let samples = vec![
            sample(Some(10.0), None),
            sample(None, Some(40.0)),
            sample(Some(20.0), Some(20.0)),
        ];
        let stats = MissionStats::from_samples(&samples, 20_000);
        assert_eq!(stats.pm2_5_avg, 15.0);
        assert_eq!(stats.pm2_5_max, 20.0);
        assert_eq!(stats.pm10_avg, 30.0);
        assert_eq!(stats.pm10_max, 40.0);
        assert_eq!(stats.measurements_count, 3);
    }

    #[test]
    fn empty_channel_yields_zero_not_nan() {
        let samples = vec![sample(None, None)];
        let stats = MissionStats::from_samples(&samples, 0);
        assert_eq!(stats.pm1_avg, 0.0);
        assert_eq!(stats.pm1_max, 0.0);
        assert!(!stats.pm2_5_avg.is_nan());
    }

    #[test]
    fn stats_of_no_samples_are_all_zero() {
        let stats = MissionStats::from_samples(&[], 0);
        assert_eq!(stats, MissionStats::default());
    }
}
