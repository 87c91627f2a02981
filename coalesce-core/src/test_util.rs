// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-memory [`CounterStore`] for testing code that records counters.
//!
//! [`MemoryCounterStore`] records every increment call it receives, can be scripted to fail for
//! specific keys, and can be gated to artificially slow increments down. Clones share state, so a
//! test keeps one clone for inspection and hands another to the scheduler.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::sync::Semaphore;

use crate::{CounterStore, StoreError};

#[derive(Clone, Debug)]
enum Failure {
    NotFound,
    Backend(String),
}

struct State<K> {
    counters: HashMap<K, u64>,
    calls: Vec<(K, u64)>,
    failures: HashMap<K, Failure>,
    in_flight: usize,
    max_in_flight: usize,
}

/// A [`CounterStore`] that keeps counters in a `HashMap`.
///
/// Unknown keys are created on first increment, unless a failure has been scripted for them.
pub struct MemoryCounterStore<K> {
    state: Arc<Mutex<State<K>>>,
    gate: Option<Arc<Semaphore>>,
}

impl<K> Clone for MemoryCounterStore<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            gate: self.gate.clone(),
        }
    }
}

impl<K> fmt::Debug for MemoryCounterStore<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCounterStore")
            .field("gated", &self.gate.is_some())
            .finish_non_exhaustive()
    }
}

impl<K: Eq + Hash> Default for MemoryCounterStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases increments held back by a gated [`MemoryCounterStore`].
#[derive(Clone, Debug)]
pub struct StoreGate(Arc<Semaphore>);

impl StoreGate {
    /// Let `n` more increment calls through.
    pub fn release(&self, n: usize) {
        self.0.add_permits(n);
    }

    /// Let every current and future increment call through.
    pub fn open(&self) {
        self.0.close();
    }
}

impl<K: Eq + Hash> MemoryCounterStore<K> {
    /// Create an empty store whose increments complete immediately.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                counters: HashMap::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
                in_flight: 0,
                max_in_flight: 0,
            })),
            gate: None,
        }
    }

    /// Create an empty store where every increment call waits for the returned [`StoreGate`] to
    /// release it. The call is recorded in [`MemoryCounterStore::calls`] before it waits.
    pub fn gated() -> (Self, StoreGate) {
        let gate = Arc::new(Semaphore::new(0));
        let store = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new()
        };
        (store, StoreGate(gate))
    }

    /// Make every future increment of `key` fail with [`StoreError::NotFound`].
    pub fn fail_not_found(&self, key: K) {
        self.lock().failures.insert(key, Failure::NotFound);
    }

    /// Make every future increment of `key` fail with a [`StoreError::Backend`] error.
    pub fn fail_backend(&self, key: K, message: impl Into<String>) {
        self.lock()
            .failures
            .insert(key, Failure::Backend(message.into()));
    }

    /// Remove every scripted failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// The stored counter for `key`, or 0 if it was never incremented.
    pub fn value(&self, key: &K) -> u64 {
        self.lock().counters.get(key).copied().unwrap_or(0)
    }

    /// Number of increment calls received so far, including failed and still-pending ones.
    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Highest number of increment calls that were pending at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Seed a counter, as if the row already existed with that value.
    pub fn insert(&self, key: K, value: u64) {
        self.lock().counters.insert(key, value);
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K: Clone> MemoryCounterStore<K> {
    /// Every `(key, amount)` increment call received so far, in arrival order.
    pub fn calls(&self) -> Vec<(K, u64)> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    /// Every call received so far, then forget them.
    pub fn take_calls(&self) -> Vec<(K, u64)> {
        std::mem::take(
            &mut self
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .calls,
        )
    }
}

impl<K> CounterStore<K> for MemoryCounterStore<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    async fn increment_counter(&self, key: &K, amount: u64) -> Result<(), StoreError> {
        {
            let mut state = self.lock();
            state.calls.push((key.clone(), amount));
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if let Some(gate) = &self.gate {
            // a closed gate means "open for everyone"
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        let mut state = self.lock();
        state.in_flight -= 1;
        match state.failures.get(key).cloned() {
            Some(Failure::NotFound) => Err(StoreError::NotFound),
            Some(Failure::Backend(message)) => Err(StoreError::backend(message)),
            None => {
                let counter = state.counters.entry(key.clone()).or_insert(0);
                *counter += amount;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert2::check;

    use super::*;

    #[tokio::test]
    async fn increments_and_records_calls() {
        let store = MemoryCounterStore::new();
        store.insert("a", 10);
        store.increment_counter(&"a", 3).await.unwrap();
        store.increment_counter(&"b", 1).await.unwrap();
        check!(store.value(&"a") == 13);
        check!(store.value(&"b") == 1);
        check!(store.calls() == vec![("a", 3), ("b", 1)]);
    }

    #[tokio::test]
    async fn scripted_failures() {
        let store = MemoryCounterStore::new();
        store.fail_not_found("gone");
        store.fail_backend("broken", "disk full");
        check!(let Err(StoreError::NotFound) = store.increment_counter(&"gone", 1).await);
        check!(let Err(StoreError::Backend(_)) = store.increment_counter(&"broken", 1).await);
        check!(store.value(&"gone") == 0);
        check!(store.call_count() == 2);

        store.clear_failures();
        store.increment_counter(&"gone", 1).await.unwrap();
        check!(store.value(&"gone") == 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gate_holds_increments() {
        let (store, gate) = MemoryCounterStore::gated();
        let pending = tokio::spawn({
            let store = store.clone();
            async move { store.increment_counter(&"a", 2).await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        check!(store.call_count() == 1);
        check!(store.value(&"a") == 0);

        gate.release(1);
        pending.await.unwrap().unwrap();
        check!(store.value(&"a") == 2);

        gate.open();
        store.increment_counter(&"a", 1).await.unwrap();
        check!(store.value(&"a") == 3);
    }
}
