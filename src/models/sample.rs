use serde::{Deserialize, Serialize};

/// Two samples closer together than this with an unchanged primary value are
/// treated as one duplicated callback, not a legitimate periodic repeat.
pub const DUPLICATE_WINDOW_MS: i64 = 500;

/// Structured readings for one tick. PM2.5 is the primary channel; the rest
/// are optional depending on sensor model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticulateReadings {
    pub pm1: Option<f64>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
}

/// A GPS fix correlated to a sample, carrying the provider's own timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
    pub fix_timestamp_ms: Option<i64>,
}

/// One recorded tick. Immutable once appended to a session buffer, except
/// for the late-arriving `weather_ref` attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    /// Wall-clock instant derived from the scheduler's deadline arithmetic,
    /// assigned once per tick.
    pub timestamp_ms: i64,
    pub readings: ParticulateReadings,
    /// The sensor's own capture stamp, for clock-drift diagnostics.
    pub device_timestamp_ms: Option<i64>,
    pub location: Option<GeoFix>,
    pub manual_context: Option<String>,
    pub automatic_context: Option<String>,
    /// Reference into weather enrichment, attached after the fact.
    pub weather_ref: Option<String>,
}

impl Sample {
    /// Duplicate-callback guard: same primary value, sub-window gap.
    pub fn duplicates(&self, earlier: &Sample) -> bool {
        self.readings.pm2_5 == earlier.readings.pm2_5
            && (self.timestamp_ms - earlier.timestamp_ms).abs() < DUPLICATE_WINDOW_MS
    }
}
