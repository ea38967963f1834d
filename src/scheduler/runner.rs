use std::sync::Arc;

use futures::future::BoxFuture;
use log::warn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::platform::Clock;

use super::cadence::{poll_interval_ms, TickCadence};

/// Wall-clock stamp for one emitted tick, fixed by the cadence arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerTick {
    pub timestamp_ms: i64,
}

pub type TickCallback = Arc<dyn Fn(SchedulerTick) -> BoxFuture<'static, ()> + Send + Sync>;

/// One running periodic trigger. Ticks are checked on a short poll loop
/// (relaxed while backgrounded) against the accumulating deadline.
pub struct FrequencyScheduler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FrequencyScheduler {
    pub fn spawn(
        period_ms: u64,
        clock: Arc<dyn Clock>,
        backgrounded: watch::Receiver<bool>,
        callback: TickCallback,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut cadence = TickCadence::align(period_ms, clock.wall_ms(), clock.monotonic_ms());
            let mut backgrounded = backgrounded;
            let mut background_signal_open = true;

            loop {
                let poll = poll_interval_ms(period_ms, *backgrounded.borrow());
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(poll)) => {}
                    changed = backgrounded.changed(), if background_signal_open => {
                        if changed.is_err() {
                            background_signal_open = false;
                        }
                    }
                }

                let (stamps, skipped) = cadence.due_ticks(clock.monotonic_ms());
                if skipped > 0 {
                    warn!("coalesced {skipped} missed deadlines after suspension");
                }
                for stamp in stamps {
                    if token.is_cancelled() {
                        return;
                    }
                    callback(SchedulerTick {
                        timestamp_ms: stamp,
                    })
                    .await;
                }
            }
        });

        Self { cancel, handle }
    }

    /// Cancel and wait for the task to finish: no callback fires after this
    /// returns.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}
