//! Recording pipeline for a portable particulate-matter monitor.
//!
//! The pipeline samples a BLE sensor on a drift-free cadence, buffers the
//! readings with crash-safe snapshots, reconciles interrupted sessions at
//! startup, and uploads finished missions through a durable retry queue.

pub mod error;
pub mod interruption;
pub mod models;
pub mod platform;
pub mod recording;
pub mod recovery;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_support;

use std::path::Path;
use std::sync::Arc;

use log::info;
use tokio::sync::watch;

use error::RecorderError;
use interruption::{InterruptionDetector, Subscription};
use platform::{Clock, EnrichmentService, LocationProvider, SensorSource, SystemClock};
use recording::{RecordingBuffer, Recorder, Sampler};
use recovery::RecoveryReconciler;
use scheduler::SchedulerRegistry;
use settings::SettingsStore;
use store::Database;
use sync::{SyncEndpoint, SyncQueueManager};

/// Host-supplied collaborators. Location and enrichment are optional;
/// samples simply omit their fields when absent.
pub struct RecorderDeps {
    pub sensor: Arc<dyn SensorSource>,
    pub location: Option<Arc<dyn LocationProvider>>,
    pub enrichment: Option<Arc<dyn EnrichmentService>>,
    pub endpoint: Arc<dyn SyncEndpoint>,
    /// True while the host reports network connectivity.
    pub connectivity: watch::Receiver<bool>,
    /// True while the host app is backgrounded.
    pub backgrounded: watch::Receiver<bool>,
    pub clock: Option<Arc<dyn Clock>>,
}

/// The wired-up pipeline. Constructed once at app start, torn down with
/// [`RecorderApp::shutdown`].
pub struct RecorderApp {
    pub db: Database,
    pub settings: Arc<SettingsStore>,
    pub detector: Arc<InterruptionDetector>,
    pub schedulers: Arc<SchedulerRegistry>,
    pub recorder: Arc<Recorder>,
    pub sync: Arc<SyncQueueManager>,
    pub recovery: Arc<RecoveryReconciler>,
    _diagnostics_subscription: Subscription,
}

impl RecorderApp {
    /// Wire the pipeline. Must run inside the tokio runtime: the sync
    /// worker is spawned here.
    pub fn init(data_dir: &Path, deps: RecorderDeps) -> Result<Self, RecorderError> {
        std::fs::create_dir_all(data_dir)
            .map_err(|err| RecorderError::Storage(err.into()))?;

        let db = Database::new(data_dir.join("airtrace.sqlite3"))?;
        let settings = Arc::new(
            SettingsStore::new(data_dir.join("settings.json")).map_err(RecorderError::Storage)?,
        );

        let clock: Arc<dyn Clock> = match deps.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock::new()),
        };

        let detector = Arc::new(InterruptionDetector::new(Arc::clone(&clock)));
        let diagnostics_subscription = detector.subscribe(Arc::new(|event| {
            Box::pin(async move {
                info!(
                    "lifecycle signal {:?} at {} (recording: {})",
                    event.kind, event.timestamp, event.was_recording
                );
            })
        }));

        let schedulers = Arc::new(SchedulerRegistry::new(
            Arc::clone(&clock),
            deps.backgrounded,
        ));

        let buffer = Arc::new(RecordingBuffer::new(db.clone(), Arc::clone(&clock)));
        let sampler = Arc::new(Sampler::new(
            Arc::clone(&buffer),
            deps.sensor,
            deps.location,
            deps.enrichment,
        ));

        let sync = Arc::new(SyncQueueManager::new(
            db.clone(),
            Arc::clone(&clock),
            deps.endpoint,
            deps.connectivity,
        ));
        sync.spawn_worker();

        let recorder = Arc::new(Recorder::new(
            db.clone(),
            Arc::clone(&clock),
            buffer,
            sampler,
            Arc::clone(&schedulers),
            Arc::clone(&sync),
            Arc::clone(&detector),
        ));

        let recovery = Arc::new(RecoveryReconciler::new(
            db.clone(),
            Arc::clone(&clock),
            Arc::clone(&sync),
        ));

        Ok(Self {
            db,
            settings,
            detector,
            schedulers,
            recorder,
            sync,
            recovery,
            _diagnostics_subscription: diagnostics_subscription,
        })
    }

    pub async fn shutdown(&self) {
        self.schedulers.stop_all().await;
        self.sync.shutdown().await;
        info!("recorder shut down");
    }
}
