//! Clock & Scheduler: wall-clock-aligned periodic ticks and one-shot timers,
//! with a cooperative-cancellation token standing in for the observed
//! source's global "running" flag (Design Note §9).
//!
//! Every long-running loop in the crate (pollers, aggregators, the AMQP
//! drain worker, backoff sleeps) is handed a clone of the same
//! `CancellationToken` so a single `shutdown()` call unwinds all of them.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// A cancellable recurring or one-shot task handle. Dropping it does not
/// cancel the underlying task (tasks are detached by default); call
/// `cancel()` explicitly.
pub struct TaskHandle {
    join_handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.join_handle.abort();
    }

    pub async fn join(self) {
        let _ = self.join_handle.await;
    }
}

/// Thin wrapper over a `CancellationToken` plus the spawn helpers described
/// in §4.1. There is deliberately no central task registry: each component
/// (kernel, bus client) holds the handles for the tasks it owns, rather than
/// exposing a global one.
#[derive(Clone)]
pub struct Scheduler {
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signals every loop holding a clone of this scheduler's token to unwind.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Schedules `fn_` to run every `interval`, starting after `initial_delay`.
    /// A panic or error surfaced by `fn_` is logged and swallowed, per the
    /// ordering guarantee in §4.1, one callback's failure must never stop the
    /// scheduler or any other loop.
    pub fn every<F, Fut>(&self, interval: Duration, initial_delay: Duration, mut fn_: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let cancel = self.cancel.clone();
        let join_handle = tokio::spawn(async move {
            let start = Instant::now() + initial_delay;
            let mut ticker = interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(err) = fn_().await {
                            warn!(error = %err, "scheduled task returned an error; continuing");
                        }
                    }
                }
            }
        });
        TaskHandle { join_handle }
    }

    /// Schedules `fn_` to run exactly once, after `delay`.
    pub fn after<F, Fut>(&self, delay: Duration, fn_: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send,
    {
        let cancel = self.cancel.clone();
        let join_handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(err) = fn_().await {
                        warn!(error = %err, "one-shot task returned an error");
                    }
                }
            }
        });
        TaskHandle { join_handle }
    }

    /// Dispatches `fn_` onto a worker other than the scheduler's own async
    /// context, for blocking operations. Genuinely CPU/syscall-blocking work
    /// goes through `spawn_blocking`; `fn_` here is the common case of
    /// "long-lived async loop that must not share a task with ticker
    /// bookkeeping" (the AMQP drain worker), so it is simply spawned onto its
    /// own task.
    pub fn in_thread<F, Fut>(&self, fn_: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let join_handle = tokio::spawn(async move {
            fn_().await;
        });
        TaskHandle { join_handle }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Given the current UTC seconds-since-minute-start-equivalent quantity `s`
/// (the caller passes seconds-into-whatever-period applies) and `interval`,
/// the delay until the next aligned boundary: `((s // interval) + 1) *
/// interval - s`. Shared by the aggregation scheduler (§4.2) for its
/// first-tick alignment.
pub fn delay_to_next_boundary(seconds_into_period: u64, interval: u64) -> Duration {
    let next_boundary = (seconds_into_period / interval + 1) * interval;
    Duration::from_secs(next_boundary - seconds_into_period)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_alignment_matches_s4_scenario() {
        // 10:17:05 UTC, interval 1800s (30 min): seconds into the half-hour
        // bucket starting at 10:00 is 17*60+5 = 1025.
        let seconds_into_period = 17 * 60 + 5;
        let delay = delay_to_next_boundary(seconds_into_period, 1800);
        assert_eq!(delay, Duration::from_secs(1800 - 1025));
    }

    #[test]
    fn boundary_alignment_at_exact_boundary_gives_full_period() {
        let delay = delay_to_next_boundary(0, 60);
        assert_eq!(delay, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn every_ticks_at_requested_interval() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let _handle = scheduler.every(Duration::from_secs(10), Duration::from_secs(0), move || {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        tokio::time::advance(Duration::from_secs(25)).await;
        tokio::task::yield_now().await;
        assert!(count.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn shutdown_stops_subsequent_ticks() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let scheduler = Scheduler::new();
        let count = Arc::new(AtomicU32::new(0));
        let count2 = count.clone();
        let handle = scheduler.every(Duration::from_millis(5), Duration::from_millis(0), move || {
            let count = count2.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.shutdown();
        handle.join().await;
        assert!(scheduler.is_stopping());
    }
}
