// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{fmt::Debug, hash::Hash, sync::Arc};

use coalesce_core::{ApplyBatch, ApplyReport, CounterStore, Counts, StoreError};
use futures::{StreamExt, stream::FuturesUnordered};

use crate::rate_limit::{LogLimit, rate_limited};

const DEFAULT_CONCURRENCY: usize = 8;

/// [`ApplyBatch`] that issues one [`CounterStore::increment_counter`] call per distinct key and
/// isolates failures per key.
///
/// A failed increment is logged, counted in the [`ApplyReport`] and dropped. It never prevents the
/// other keys of the same batch from being attempted, and it is never retried or re-queued. Missing
/// rows ([`StoreError::NotFound`]) are the common case, since resources get deleted while their
/// events wait for a flush, and are only logged at `debug`.
///
/// Up to [`concurrency`](Self::concurrency) increments of one batch run at the same time.
///
/// Failure warnings are limited to one per second per applier. Clones share that limit.
#[derive(Debug, Clone)]
pub struct BestEffortPerKeyApply<S> {
    store: S,
    concurrency: usize,
    failure_log: Arc<LogLimit>,
}

impl<S> BestEffortPerKeyApply<S> {
    /// Apply batches to `store`, with up to 8 concurrent increments per batch.
    pub fn new(store: S) -> Self {
        Self {
            store,
            concurrency: DEFAULT_CONCURRENCY,
            failure_log: Arc::new(LogLimit::per_second()),
        }
    }

    /// Sets how many increment calls of one batch may be in flight at once.
    ///
    /// Defaults to 8. Use 1 to apply keys strictly one after the other, e.g. for a store that only
    /// has a single connection.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        assert!(concurrency > 0, "concurrency must not be zero");
        self.concurrency = concurrency;
        self
    }

    /// The store increments are applied to.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn increment<K>(&self, key: K, amount: u64) -> (K, u64, Result<(), StoreError>)
    where
        S: CounterStore<K>,
    {
        let result = self.store.increment_counter(&key, amount).await;
        (key, amount, result)
    }
}

impl<K, S> ApplyBatch<K> for BestEffortPerKeyApply<S>
where
    K: Eq + Hash + Debug + Send + Sync,
    S: CounterStore<K>,
{
    async fn apply_batch(&self, counts: Counts<K>) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut keys = counts.into_iter();
        let mut in_flight = FuturesUnordered::new();
        loop {
            while in_flight.len() < self.concurrency {
                let Some((key, amount)) = keys.next() else {
                    break;
                };
                in_flight.push(self.increment(key, amount));
            }
            let Some((key, amount, result)) = in_flight.next().await else {
                break;
            };
            match result {
                Ok(()) => report.applied += 1,
                Err(StoreError::NotFound) => {
                    report.not_found += 1;
                    tracing::debug!(?key, amount, "counter row is gone, dropping increment");
                }
                Err(err) => {
                    report.failed += 1;
                    rate_limited!(
                        self.failure_log,
                        tracing::warn!(?key, amount, %err, "couldn't apply counter increment, dropping it")
                    );
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert2::check;
    use coalesce_core::test_util::MemoryCounterStore;
    use rstest::rstest;
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::*;

    fn sorted<K: Ord + Clone>(mut calls: Vec<(K, u64)>) -> Vec<(K, u64)> {
        calls.sort();
        calls
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(64)]
    #[tokio::test]
    async fn one_increment_per_distinct_key(#[case] concurrency: usize) {
        let store = MemoryCounterStore::new();
        let apply = BestEffortPerKeyApply::new(store.clone()).concurrency(concurrency);

        let report = apply
            .apply_batch(Counts::from_batch(["a", "b", "a", "a", "c"]))
            .await;

        check!(
            report
                == ApplyReport {
                    applied: 3,
                    not_found: 0,
                    failed: 0
                }
        );
        check!(sorted(store.calls()) == vec![("a", 3), ("b", 1), ("c", 1)]);
    }

    #[tokio::test]
    async fn failed_key_does_not_stop_the_others() {
        let store = MemoryCounterStore::new();
        store.fail_not_found("a");
        store.fail_backend("d", "database is locked");
        let apply = BestEffortPerKeyApply::new(store.clone()).concurrency(1);

        let report = apply
            .apply_batch(Counts::from_batch(["a", "b", "a", "c", "d"]))
            .await;

        check!(report.applied == 2);
        check!(report.not_found == 1);
        check!(report.failed == 1);
        check!(store.call_count() == 4);
        check!(store.value(&"a") == 0);
        check!(store.value(&"b") == 1);
        check!(store.value(&"c") == 1);
        check!(store.value(&"d") == 0);
    }

    #[tokio::test]
    async fn concurrency_bounds_in_flight_increments() {
        let (store, gate) = MemoryCounterStore::gated();
        let apply = Arc::new(BestEffortPerKeyApply::new(store.clone()).concurrency(2));
        let batch: Counts<u32> = (0..10).collect();

        let task = tokio::spawn({
            let apply = Arc::clone(&apply);
            async move { apply.apply_batch(batch).await }
        });
        while store.call_count() < 2 {
            tokio::task::yield_now().await;
        }
        check!(store.call_count() == 2);

        gate.open();
        let report = task.await.unwrap();
        check!(report.applied == 10);
        check!(store.max_in_flight() == 2);
    }

    #[derive(Clone, Default)]
    struct CountWarnings(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for CountWarnings {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn failure_warnings_are_limited_per_applier() {
        let warnings = CountWarnings::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(warnings.clone()));

        let first_store = MemoryCounterStore::new();
        first_store.fail_backend("x", "database is locked");
        let first = BestEffortPerKeyApply::new(first_store);
        let second_store = MemoryCounterStore::new();
        second_store.fail_backend("y", "database is locked");
        let second = BestEffortPerKeyApply::new(second_store);

        first.apply_batch(Counts::from_batch(["x"])).await;
        first.apply_batch(Counts::from_batch(["x"])).await;
        check!(warnings.0.load(Ordering::SeqCst) == 1);

        second.apply_batch(Counts::from_batch(["y"])).await;
        check!(warnings.0.load(Ordering::SeqCst) == 2);
    }

    #[tokio::test]
    async fn works_through_shared_store() {
        let store = Arc::new(MemoryCounterStore::new());
        let apply = BestEffortPerKeyApply::new(Arc::clone(&store));
        apply.apply_batch(Counts::from_batch(["k"; 4])).await;
        check!(store.value(&"k") == 4);
    }
}
