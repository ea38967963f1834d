use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::models::Sample;
use crate::platform::{EnrichmentService, LocationProvider, SensorSource};

use super::buffer::{AppendOutcome, RecordingBuffer};

/// Session-scope context labels, updatable while recording.
#[derive(Debug, Clone, Default)]
pub struct ContextLabels {
    pub manual: Option<String>,
    pub automatic: Option<String>,
}

/// Assembles one sample per scheduler tick from the sensor, GPS, and context
/// sources, and hands it to the buffer. Enrichment runs on its own task and
/// attaches by reference afterwards; capture never waits on it.
pub struct Sampler {
    buffer: Arc<RecordingBuffer>,
    sensor: Arc<dyn SensorSource>,
    location: Option<Arc<dyn LocationProvider>>,
    enrichment: Option<Arc<dyn EnrichmentService>>,
    context: Mutex<ContextLabels>,
}

impl Sampler {
    pub fn new(
        buffer: Arc<RecordingBuffer>,
        sensor: Arc<dyn SensorSource>,
        location: Option<Arc<dyn LocationProvider>>,
        enrichment: Option<Arc<dyn EnrichmentService>>,
    ) -> Self {
        Self {
            buffer,
            sensor,
            location,
            enrichment,
            context: Mutex::new(ContextLabels::default()),
        }
    }

    pub fn set_context(&self, labels: ContextLabels) {
        *self.context.lock().unwrap() = labels;
    }

    /// Capture one tick. Failures are logged, never propagated: a bad tick
    /// must not take the scheduler down with it.
    pub async fn capture(&self, timestamp_ms: i64) {
        let Some(reading) = self.sensor.latest_reading().await else {
            debug!("no sensor reading available at {timestamp_ms}");
            return;
        };

        let fix = match &self.location {
            Some(provider) => provider.latest_fix().await,
            None => None,
        };

        let labels = self.context.lock().unwrap().clone();
        let sample = Sample {
            timestamp_ms,
            readings: reading.readings,
            device_timestamp_ms: reading.device_timestamp_ms,
            location: fix.clone(),
            manual_context: labels.manual,
            automatic_context: labels.automatic,
            weather_ref: None,
        };

        match self.buffer.append(sample).await {
            Ok(AppendOutcome::Appended) => {}
            Ok(AppendOutcome::DuplicateSuppressed) => return,
            Ok(AppendOutcome::AppendedNotPersisted { storage_full }) => {
                if storage_full {
                    warn!("storage full; sample at {timestamp_ms} held in memory only");
                }
            }
            Err(err) => {
                warn!("sample at {timestamp_ms} dropped: {err}");
                return;
            }
        }

        if let (Some(service), Some(fix)) = (self.enrichment.as_ref(), fix) {
            let service = Arc::clone(service);
            let buffer = Arc::clone(&self.buffer);
            tokio::spawn(async move {
                match service.weather_reference(&fix).await {
                    Ok(Some(reference)) => {
                        if !buffer.attach_weather_ref(timestamp_ms, reference).await {
                            debug!("session closed before enrichment resolved; reference dropped");
                        }
                    }
                    Ok(None) => {}
                    Err(err) => debug!("weather enrichment failed: {err:#}"),
                }
            });
        }
    }
}
