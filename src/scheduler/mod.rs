mod cadence;
mod runner;

pub use cadence::{poll_interval_ms, TickCadence, BACKGROUND_POLL_MS, CATCHUP_CAP};
pub use runner::{FrequencyScheduler, SchedulerTick, TickCallback};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::platform::Clock;

/// Running scheduler instances keyed by caller-supplied id. Starting a new
/// instance under an existing id fully cancels the prior one first.
pub struct SchedulerRegistry {
    clock: Arc<dyn Clock>,
    backgrounded: watch::Receiver<bool>,
    instances: Mutex<HashMap<String, FrequencyScheduler>>,
}

impl SchedulerRegistry {
    pub fn new(clock: Arc<dyn Clock>, backgrounded: watch::Receiver<bool>) -> Self {
        Self {
            clock,
            backgrounded,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub async fn start(&self, id: &str, period_ms: u64, callback: TickCallback) {
        let mut instances = self.instances.lock().await;
        if let Some(existing) = instances.remove(id) {
            existing.stop().await;
        }

        let scheduler = FrequencyScheduler::spawn(
            period_ms,
            Arc::clone(&self.clock),
            self.backgrounded.clone(),
            callback,
        );
        instances.insert(id.to_string(), scheduler);
    }

    /// Returns whether an instance was running under this id.
    pub async fn stop(&self, id: &str) -> bool {
        let existing = self.instances.lock().await.remove(id);
        match existing {
            Some(scheduler) => {
                scheduler.stop().await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&self) {
        let drained: Vec<_> = self.instances.lock().await.drain().collect();
        for (_, scheduler) in drained {
            scheduler.stop().await;
        }
    }
}
