//! Host-lifecycle signal fan-out.
//!
//! The host bridge reports lifecycle transitions here; registered
//! subscribers (emergency flush, diagnostics) run on their own tasks so one
//! failing subscriber never starves the others. Critical signals race the
//! subscribers against a short deadline because the host may tear the
//! process down right after.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::platform::Clock;

/// Budget for critical-path subscriber completion before the detector
/// proceeds anyway.
pub const CRITICAL_TIMEOUT_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterruptionKind {
    VisibilityHidden,
    PageHide,
    Freeze,
    Blur,
    BeforeUnload,
    AppPause,
}

impl InterruptionKind {
    /// Critical signals precede likely teardown; their handling races a
    /// deadline instead of waiting indefinitely.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            InterruptionKind::PageHide
                | InterruptionKind::Freeze
                | InterruptionKind::BeforeUnload
                | InterruptionKind::AppPause
        )
    }
}

#[derive(Debug, Clone)]
pub struct InterruptionEvent {
    pub kind: InterruptionKind,
    pub timestamp: DateTime<Utc>,
    pub was_recording: bool,
}

pub type InterruptionCallback =
    Arc<dyn Fn(InterruptionEvent) -> BoxFuture<'static, ()> + Send + Sync>;

struct SubscriberRegistry {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, InterruptionCallback>>,
}

/// Unsubscribe token returned by [`InterruptionDetector::subscribe`].
/// Dropping it removes the subscriber.
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.subscribers.lock().unwrap().remove(&self.id);
        }
    }
}

/// Explicitly constructed, shared via `Arc`; one per process lifetime.
pub struct InterruptionDetector {
    clock: Arc<dyn Clock>,
    recording_active: AtomicBool,
    registry: Arc<SubscriberRegistry>,
}

impl InterruptionDetector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            recording_active: AtomicBool::new(false),
            registry: Arc::new(SubscriberRegistry {
                next_id: AtomicU64::new(0),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Set by the recording subsystem around session start/stop.
    pub fn set_recording_active(&self, active: bool) {
        self.recording_active.store(active, Ordering::SeqCst);
    }

    pub fn is_recording_active(&self) -> bool {
        self.recording_active.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, callback: InterruptionCallback) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .subscribers
            .lock()
            .unwrap()
            .insert(id, callback);
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Fan one lifecycle signal out to every subscriber. Non-critical
    /// signals are ignored entirely while no recording is active.
    pub async fn dispatch(&self, kind: InterruptionKind) {
        let was_recording = self.is_recording_active();
        if !kind.is_critical() && !was_recording {
            debug!("ignoring {kind:?} with no active recording");
            return;
        }

        let event = InterruptionEvent {
            kind,
            timestamp: self.clock.wall(),
            was_recording,
        };

        let callbacks: Vec<InterruptionCallback> = self
            .registry
            .subscribers
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();

        let mut handles = Vec::with_capacity(callbacks.len());
        for callback in callbacks {
            handles.push(tokio::spawn(callback(event.clone())));
        }

        let join_all = async {
            for handle in handles {
                if let Err(err) = handle.await {
                    error!("interruption subscriber failed: {err}");
                }
            }
        };

        if kind.is_critical() {
            let deadline = Duration::from_millis(CRITICAL_TIMEOUT_MS);
            if tokio::time::timeout(deadline, join_all).await.is_err() {
                warn!(
                    "{kind:?} handling exceeded {CRITICAL_TIMEOUT_MS}ms; proceeding without it"
                );
            }
        } else {
            join_all.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::SystemClock;
    use std::sync::atomic::AtomicUsize;

    fn detector() -> InterruptionDetector {
        InterruptionDetector::new(Arc::new(SystemClock::new()))
    }

    fn counting(counter: Arc<AtomicUsize>) -> InterruptionCallback {
        Arc::new(move |_event| {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn non_critical_signals_are_suppressed_when_idle() {
        let detector = detector();
        let counter = Arc::new(AtomicUsize::new(0));
        let _sub = detector.subscribe(counting(Arc::clone(&counter)));

        detector.dispatch(InterruptionKind::Blur).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        detector.set_recording_active(true);
        detector.dispatch(InterruptionKind::Blur).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn critical_signals_dispatch_even_when_idle() {
        let detector = detector();
        let counter = Arc::new(AtomicUsize::new(0));
        let _sub = detector.subscribe(counting(Arc::clone(&counter)));

        detector.dispatch(InterruptionKind::PageHide).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_panicking_subscriber_does_not_block_the_rest() {
        let detector = detector();
        detector.set_recording_active(true);
        let counter = Arc::new(AtomicUsize::new(0));

        let _bad = detector.subscribe(Arc::new(|_event| {
            Box::pin(async {
                panic!("subscriber exploded");
            })
        }));
        let _good = detector.subscribe(counting(Arc::clone(&counter)));

        detector.dispatch(InterruptionKind::Blur).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_dispatch_returns_despite_a_hung_subscriber() {
        let detector = detector();
        detector.set_recording_active(true);
        let counter = Arc::new(AtomicUsize::new(0));

        let _hung = detector.subscribe(Arc::new(|_event| {
            Box::pin(futures::future::pending::<()>())
        }));
        let _good = detector.subscribe(counting(Arc::clone(&counter)));

        detector.dispatch(InterruptionKind::PageHide).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_subscription_stops_receiving_events() {
        let detector = detector();
        detector.set_recording_active(true);
        let counter = Arc::new(AtomicUsize::new(0));

        let sub = detector.subscribe(counting(Arc::clone(&counter)));
        detector.dispatch(InterruptionKind::Blur).await;
        sub.unsubscribe();
        detector.dispatch(InterruptionKind::Blur).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
