// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Contains the [`ApplyBatch`] trait, which turns one flush's [`Counts`] into persistence calls.

use std::{future::Future, hash::Hash, ops::AddAssign, sync::Arc};

use crate::Counts;

/// Applies the aggregated counts of one flush to persistent storage.
///
/// The scheduler calls `apply_batch` at most once at a time per scheduler, with a non-empty
/// [`Counts`]. There is no error channel: implementations contain their own failures and describe
/// the outcome in the returned [`ApplyReport`], which is only used for statistics and logging.
pub trait ApplyBatch<K: Eq + Hash>: Send + Sync {
    /// Persist every count in `counts`.
    fn apply_batch(&self, counts: Counts<K>) -> impl Future<Output = ApplyReport> + Send;
}

impl<K: Eq + Hash, A: ApplyBatch<K>> ApplyBatch<K> for Arc<A> {
    fn apply_batch(&self, counts: Counts<K>) -> impl Future<Output = ApplyReport> + Send {
        (**self).apply_batch(counts)
    }
}

/// Outcome of one [`ApplyBatch::apply_batch`] call, counted in keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Keys whose increment was persisted.
    pub applied: u64,
    /// Keys whose row no longer exists. Their increment is dropped.
    pub not_found: u64,
    /// Keys whose increment failed for any other reason. Their increment is dropped.
    pub failed: u64,
}

impl ApplyReport {
    /// Number of keys that were attempted.
    pub fn attempted(&self) -> u64 {
        self.applied + self.not_found + self.failed
    }

    /// Whether every attempted key was persisted.
    pub fn is_complete(&self) -> bool {
        self.not_found == 0 && self.failed == 0
    }
}

impl AddAssign for ApplyReport {
    fn add_assign(&mut self, rhs: Self) {
        self.applied += rhs.applied;
        self.not_found += rhs.not_found;
        self.failed += rhs.failed;
    }
}
