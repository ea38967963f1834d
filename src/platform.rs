//! Host-capability seams.
//!
//! The pipeline never reads clocks or device bridges directly; everything
//! comes through these traits so the core runs unchanged under tests and on
//! targets without a real sensor or GPS stack.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{GeoFix, ParticulateReadings};

/// Time source split into a monotonic lane (interval accounting) and a
/// wall-clock lane (persisted timestamps). Wall-clock jumps must never leak
/// into deadline arithmetic.
pub trait Clock: Send + Sync {
    /// Milliseconds on a monotonic axis. Origin is arbitrary but fixed for
    /// the life of the clock.
    fn monotonic_ms(&self) -> u64;

    fn wall(&self) -> DateTime<Utc>;

    fn wall_ms(&self) -> i64 {
        self.wall().timestamp_millis()
    }
}

/// Production clock: `Instant` anchored at construction plus `Utc::now`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// One reading pulled from the particulate sensor, stamped with the device's
/// own capture time so drift against the host clock stays visible.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub readings: ParticulateReadings,
    pub device_timestamp_ms: Option<i64>,
}

/// Latest-value pull interface over the BLE sensor bridge.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn latest_reading(&self) -> Option<SensorReading>;
}

/// GPS bridge. Absent entirely when location is disabled.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn latest_fix(&self) -> Option<GeoFix>;
}

/// Weather/location enrichment. Best-effort: failures degrade to "no
/// reference" and never reach the capture path.
#[async_trait]
pub trait EnrichmentService: Send + Sync {
    async fn weather_reference(&self, fix: &GeoFix) -> anyhow::Result<Option<String>>;
}
