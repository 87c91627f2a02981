// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    fmt,
    hash::Hash,
    mem,
    pin::pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use coalesce_core::{ApplyBatch, Counts};
use futures::future::{Either, select};
use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

use crate::{
    rate_limit::{LogLimit, rate_limited},
    stats::{SchedulerStats, StatsSnapshot},
};

const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Builder for [`Scheduler`]
#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
    flush_interval: Duration,
    name: String,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            name: "coalesce".into(),
        }
    }
}

impl SchedulerBuilder {
    /// Create a builder with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how often the queue is drained and flushed.
    ///
    /// Defaults to 10 seconds.
    ///
    /// Ticks follow a fixed period and are not corrected for the time a flush takes. A flush that
    /// runs longer than the interval causes the following tick(s) to be skipped, and the events
    /// queued meanwhile go into the next flush.
    ///
    /// A longer interval coalesces more events into each write, at the cost of counters lagging
    /// further behind and a larger loss window if the process dies.
    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        assert!(
            flush_interval > Duration::ZERO,
            "flush_interval must not be zero"
        );
        self.flush_interval = flush_interval;
        self
    }

    /// Name used for the tracing span and logs of this scheduler. Defaults to `coalesce`.
    ///
    /// When running one scheduler per domain, include the domain in the name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "name must not be empty");
        self.name = name;
        self
    }

    /// Start a [`Scheduler`] whose flushes are applied by `applier`.
    ///
    /// The timer starts immediately. The first flush happens one interval from now.
    ///
    /// Returns both the producer side, which can be cloned freely, and the [`SchedulerHandle`]
    /// that owns the timer. Dropping the handle stops the scheduler.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build<K, A>(self, applier: A) -> (Scheduler<K>, SchedulerHandle)
    where
        K: Eq + Hash + Send + 'static,
        A: ApplyBatch<K> + 'static,
    {
        let intake = Arc::new(Intake::new());
        let stats = Arc::new(SchedulerStats::default());
        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();

        let flush_loop = FlushLoop {
            intake: Arc::clone(&intake),
            applier: Arc::new(applier),
            stats: Arc::clone(&stats),
            tasks: tasks.clone(),
            flush_interval: self.flush_interval,
            panic_log: LogLimit::per_second(),
        };
        let span = tracing::info_span!("coalesce scheduler", scheduler = %self.name);
        tasks.spawn(flush_loop.run(cancel.clone()).instrument(span));
        // closing only means `wait` can complete, flushes can still be spawned
        tasks.close();

        tracing::info!(
            scheduler = %self.name,
            flush_interval = ?self.flush_interval,
            "started write-coalescing scheduler"
        );

        (
            Scheduler {
                intake: Arc::clone(&intake),
            },
            SchedulerHandle {
                name: self.name,
                intake,
                stats,
                cancel,
                tasks,
                detached: false,
            },
        )
    }
}

/// Producer side of a write-coalescing scheduler for keys of type `K`.
///
/// Cloning is cheap and still appends to the same shared queue. See [`SchedulerBuilder::build`].
pub struct Scheduler<K> {
    intake: Arc<Intake<K>>,
}

impl<K> Clone for Scheduler<K> {
    fn clone(&self) -> Self {
        Self {
            intake: Arc::clone(&self.intake),
        }
    }
}

impl<K> fmt::Debug for Scheduler<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl<K> Scheduler<K> {
    /// Record one event for `key`.
    ///
    /// Never blocks on IO or on a running flush, never fails, and can be called from any number of
    /// threads or tasks at once. The event is counted in the flush following the next tick that
    /// finds no flush running. Events enqueued after the scheduler was stopped are discarded.
    pub fn enqueue(&self, key: K) {
        self.intake.push(key);
    }

    /// Number of events waiting for the next drain.
    pub fn pending(&self) -> usize {
        self.intake.lock().items.len()
    }

    /// Whether the scheduler was stopped. A stopped scheduler discards every event.
    pub fn is_stopped(&self) -> bool {
        self.intake.lock().stopped
    }
}

/// Handle owning the timer of a [`Scheduler`].
///
/// Dropping the handle [stops](SchedulerHandle::stop) the scheduler without waiting for an
/// in-flight flush. Use [`SchedulerHandle::shutdown`] to also wait for it, or
/// [`SchedulerHandle::forget`] to let the scheduler run for as long as the runtime does.
pub struct SchedulerHandle {
    name: String,
    intake: Arc<dyn Stop>,
    stats: Arc<SchedulerStats>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    detached: bool,
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Stop the scheduler.
    ///
    /// Once this returns no batch will be drained. Events still waiting in the queue are
    /// discarded, and so are events enqueued later. A flush that is already running is left to
    /// complete. On a multi-threaded runtime, that includes a batch the timer drained just before
    /// the stop, whose flush may begin right after this returns.
    ///
    /// Calling `stop` more than once is a no-op.
    pub fn stop(&self) {
        if self.intake.stop() {
            tracing::info!(scheduler = %self.name, "stopping write-coalescing scheduler");
        }
        self.cancel.cancel();
    }

    /// Stop the scheduler, then wait for the timer task and an in-flight flush, if any, to finish.
    ///
    /// A panic in that last flush is counted in [`StatsSnapshot::flush_panics`] before this returns.
    pub async fn shutdown(&self) {
        self.stop();
        self.tasks.wait().await;
        tracing::info!(scheduler = %self.name, "write-coalescing scheduler shut down");
    }

    /// Whether [`SchedulerHandle::stop`] was called.
    pub fn is_stopped(&self) -> bool {
        self.intake.is_stopped()
    }

    /// Running totals of this scheduler.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// The name given by [`SchedulerBuilder::name`].
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drop the handle but keep the scheduler running until the runtime shuts down.
    pub fn forget(mut self) {
        self.detached = true;
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.stop();
        }
    }
}

// Type-erased stop switch so that the handle doesn't carry the key type.
trait Stop: Send + Sync {
    /// Returns true if this call stopped the intake.
    fn stop(&self) -> bool;

    fn is_stopped(&self) -> bool;
}

struct Queue<K> {
    items: Vec<K>,
    stopped: bool,
}

// The queue is only touched by producers appending and by the timer swapping it out. Both hold
// the lock for a constant amount of work, so producers never wait behind a flush.
struct Intake<K> {
    queue: Mutex<Queue<K>>,
}

impl<K> Intake<K> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                items: Vec::new(),
                stopped: false,
            }),
        }
    }

    fn push(&self, item: K) {
        let mut queue = self.lock();
        if !queue.stopped {
            queue.items.push(item);
        }
    }

    /// Swap the queue for an empty one. Returns `None` once stopped.
    fn take(&self) -> Option<Vec<K>> {
        let mut queue = self.lock();
        if queue.stopped {
            None
        } else {
            Some(mem::take(&mut queue.items))
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue<K>> {
        // a panicking producer can't leave a Vec half-pushed, so the data is still good
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Send> Stop for Intake<K> {
    fn stop(&self) -> bool {
        let dropped = {
            let mut queue = self.lock();
            if queue.stopped {
                return false;
            }
            queue.stopped = true;
            mem::take(&mut queue.items)
        };
        if !dropped.is_empty() {
            tracing::debug!(
                dropped = dropped.len(),
                "discarding events that were not flushed before stop"
            );
        }
        true
    }

    fn is_stopped(&self) -> bool {
        self.lock().stopped
    }
}

// Timer task of one scheduler.
struct FlushLoop<K, A> {
    intake: Arc<Intake<K>>,
    applier: Arc<A>,
    stats: Arc<SchedulerStats>,
    tasks: TaskTracker,
    flush_interval: Duration,
    panic_log: LogLimit,
}

impl<K, A> FlushLoop<K, A>
where
    K: Eq + Hash + Send + 'static,
    A: ApplyBatch<K> + 'static,
{
    async fn run(self, shutdown_signal: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.flush_interval,
            self.flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<()>> = None;

        // Wait for either the next tick or the scheduler being stopped. Once stopped,
        // `Either::Right` is returned and we exit the loop.
        while let Either::Left(_tick) =
            select(pin!(ticker.tick()), pin!(shutdown_signal.cancelled())).await
        {
            self.stats.record_tick();

            // at most one flush at a time, the queue keeps accumulating meanwhile
            if in_flight.as_ref().is_some_and(|flush| !flush.is_finished()) {
                self.stats.record_skipped_tick();
                tracing::debug!(
                    pending = self.intake.lock().items.len(),
                    "previous flush still running, skipping tick"
                );
                continue;
            }
            if let Some(flush) = in_flight.take() {
                self.reap(flush).await;
            }

            let Some(batch) = self.intake.take() else {
                break; // stopped between the tick and the drain
            };
            if batch.is_empty() {
                continue;
            }
            // a stop between the drain and the spawn drops the batch
            if shutdown_signal.is_cancelled() {
                tracing::debug!(dropped = batch.len(), "stopped before the flush started");
                break;
            }
            let flush = flush_batch(batch, Arc::clone(&self.applier), Arc::clone(&self.stats));
            in_flight = Some(self.tasks.spawn(flush.in_current_span()));
        }

        // the last flush may still be running, its outcome is reported before the timer
        // task ends so that `shutdown` observes it
        if let Some(flush) = in_flight.take() {
            self.reap(flush).await;
        }
        tracing::debug!("flush timer stopped");
    }

    async fn reap(&self, flush: JoinHandle<()>) {
        if let Err(err) = flush.await {
            if err.is_panic() {
                self.stats.record_flush_panic();
                rate_limited!(
                    self.panic_log,
                    tracing::error!(%err, "flush task panicked, its batch was lost")
                );
            }
        }
    }
}

async fn flush_batch<K, A>(batch: Vec<K>, applier: Arc<A>, stats: Arc<SchedulerStats>)
where
    K: Eq + Hash,
    A: ApplyBatch<K>,
{
    let started = Instant::now();
    let events = batch.len() as u64;
    let counts = Counts::from_batch(batch);
    let keys = counts.len();

    let report = applier.apply_batch(counts).await;

    stats.record_flush(events, &report);
    tracing::debug!(
        events,
        keys,
        applied = report.applied,
        not_found = report.not_found,
        failed = report.failed,
        elapsed = ?started.elapsed(),
        "flushed batch"
    );
}

#[cfg(test)]
mod tests {
    use assert2::check;

    use super::*;

    #[test]
    fn take_swaps_the_whole_queue() {
        let intake = Intake::new();
        intake.push("a");
        intake.push("b");
        check!(intake.take() == Some(vec!["a", "b"]));
        check!(intake.take() == Some(vec![]));

        intake.push("c");
        check!(intake.take() == Some(vec!["c"]));
    }

    #[test]
    fn stop_discards_queue_and_later_events() {
        let intake = Intake::new();
        intake.push("a");
        check!(intake.stop());
        check!(!intake.stop());
        check!(intake.is_stopped());

        intake.push("b");
        check!(intake.lock().items.is_empty());
        check!(intake.take() == None);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let intake = Arc::new(Intake::new());
        let mut drained = Vec::new();
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let intake = Arc::clone(&intake);
                s.spawn(move || {
                    for i in 0..1_000u32 {
                        intake.push(t * 1_000 + i);
                    }
                });
            }
            for _ in 0..100 {
                drained.extend(intake.take().unwrap());
            }
        });
        drained.extend(intake.take().unwrap());
        drained.sort();
        check!(drained == (0..4_000).collect::<Vec<_>>());
    }

    #[test]
    #[should_panic(expected = "flush_interval must not be zero")]
    fn zero_interval_is_rejected() {
        let _ = SchedulerBuilder::new().flush_interval(Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "name must not be empty")]
    fn empty_name_is_rejected() {
        let _ = SchedulerBuilder::new().name("");
    }
}
