// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Contains the [`CounterStore`] trait, the persistence side of a scheduler.

use std::{error::Error, fmt, future::Future, sync::Arc};

/// The error cases for a [`CounterStore::increment_counter`] call.
#[derive(Debug)]
pub enum StoreError {
    /// The counter's row doesn't exist, normally because the resource was deleted between the
    /// event happening and the flush running. This is the expected failure and is swallowed quietly.
    NotFound,
    /// The store couldn't be reached (closed, timed out, shutting down).
    Unavailable(String),
    /// Any other failure reported by the store.
    Backend(Box<dyn Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an arbitrary store error.
    pub fn backend(err: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }

    /// Whether this is [`StoreError::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("counter row not found"),
            Self::Unavailable(reason) => write!(f, "counter store unavailable: {reason}"),
            Self::Backend(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Backend(err) => Some(&**err),
            _ => None,
        }
    }
}

/// A persistent store of per-key counters, scoped to one tenant.
///
/// Implementations must add `amount` to the stored counter atomically with respect to other writers
/// of the same row. Calls are not idempotent and are never retried by the scheduler.
///
/// A missing row must be reported as [`StoreError::NotFound`] rather than as a generic failure, so
/// it can be told apart from an outage in logs and statistics.
pub trait CounterStore<K>: Send + Sync {
    /// Atomically add `amount` to the counter stored for `key`.
    fn increment_counter(
        &self,
        key: &K,
        amount: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<K, S: CounterStore<K>> CounterStore<K> for Arc<S> {
    fn increment_counter(
        &self,
        key: &K,
        amount: u64,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        (**self).increment_counter(key, amount)
    }
}
