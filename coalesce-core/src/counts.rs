// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Contains [`Counts`], the per-key aggregate of one drained batch.

use std::{fmt, hash::Hash};

use hashbrown::HashMap;

/// Occurrence count of every distinct key in a batch.
///
/// Built fresh from each drained batch and handed to an [`ApplyBatch`](crate::ApplyBatch). Every
/// count is at least 1 and equals exactly the number of times the key appeared in the batch.
/// Iteration order is unspecified.
///
/// ```
/// # use coalesce_core::Counts;
/// let counts = Counts::from_batch(["a", "b", "a", "a", "c"]);
/// assert_eq!(counts.get(&"a"), Some(3));
/// assert_eq!(counts.get(&"b"), Some(1));
/// assert_eq!(counts.len(), 3);
/// assert_eq!(counts.total(), 5);
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Counts<K: Eq + Hash> {
    counts: HashMap<K, u64>,
}

impl<K: Eq + Hash> Counts<K> {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    /// Count every occurrence of every key in `batch`.
    pub fn from_batch(batch: impl IntoIterator<Item = K>) -> Self {
        let mut counts = Self::new();
        counts.extend(batch);
        counts
    }

    /// Record one more occurrence of `key`.
    pub fn record(&mut self, key: K) {
        self.record_n(key, 1);
    }

    /// Record `n` more occurrences of `key`. Recording zero occurrences is a no-op, so the
    /// aggregate never holds a zero count.
    pub fn record_n(&mut self, key: K, n: u64) {
        if n == 0 {
            return;
        }
        let count = self.counts.entry(key).or_insert(0);
        *count = count.saturating_add(n);
    }

    /// Number of occurrences of `key`, or `None` if it never occurred.
    pub fn get(&self, key: &K) -> Option<u64> {
        self.counts.get(key).copied()
    }

    /// Number of distinct keys, which is also the number of persistence calls a flush makes.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether no key was recorded.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Sum of all counts, i.e. the number of events that were aggregated.
    pub fn total(&self) -> u64 {
        self.counts.values().fold(0u64, |acc, n| acc.saturating_add(*n))
    }

    /// Iterate over `(key, count)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.counts.iter().map(|(k, n)| (k, *n))
    }
}

impl<K: Eq + Hash> Default for Counts<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + fmt::Debug> fmt::Debug for Counts<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.counts.iter()).finish()
    }
}

impl<K: Eq + Hash> Extend<K> for Counts<K> {
    fn extend<I: IntoIterator<Item = K>>(&mut self, iter: I) {
        for key in iter {
            self.record(key);
        }
    }
}

impl<K: Eq + Hash> FromIterator<K> for Counts<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self::from_batch(iter)
    }
}

impl<K: Eq + Hash> IntoIterator for Counts<K> {
    type Item = (K, u64);
    type IntoIter = hashbrown::hash_map::IntoIter<K, u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.counts.into_iter()
    }
}
