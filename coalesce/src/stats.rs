// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

use coalesce_core::ApplyReport;

/// Running totals kept by one scheduler. Every counter only ever increases.
#[derive(Debug, Default)]
pub(crate) struct SchedulerStats {
    ticks: AtomicU64,
    skipped_ticks: AtomicU64,
    flushes: AtomicU64,
    events_flushed: AtomicU64,
    keys_applied: AtomicU64,
    keys_not_found: AtomicU64,
    keys_failed: AtomicU64,
    flush_panics: AtomicU64,
}

impl SchedulerStats {
    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self, events: u64, report: &ApplyReport) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.events_flushed.fetch_add(events, Ordering::Relaxed);
        self.keys_applied
            .fetch_add(report.applied, Ordering::Relaxed);
        self.keys_not_found
            .fetch_add(report.not_found, Ordering::Relaxed);
        self.keys_failed.fetch_add(report.failed, Ordering::Relaxed);
    }

    pub(crate) fn record_flush_panic(&self) {
        self.flush_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            events_flushed: self.events_flushed.load(Ordering::Relaxed),
            keys_applied: self.keys_applied.load(Ordering::Relaxed),
            keys_not_found: self.keys_not_found.load(Ordering::Relaxed),
            keys_failed: self.keys_failed.load(Ordering::Relaxed),
            flush_panics: self.flush_panics.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a scheduler's running totals, see [`SchedulerHandle::stats`].
///
/// The fields are read independently, so a snapshot taken while a flush completes may be off by
/// that one flush between fields.
///
/// [`SchedulerHandle::stats`]: crate::SchedulerHandle::stats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct StatsSnapshot {
    /// Timer ticks observed while running.
    pub ticks: u64,
    /// Ticks that didn't start a flush because the previous one was still running.
    pub skipped_ticks: u64,
    /// Completed flushes. Ticks that found an empty queue don't count.
    pub flushes: u64,
    /// Events drained by completed flushes.
    pub events_flushed: u64,
    /// Keys whose increment was persisted.
    pub keys_applied: u64,
    /// Keys dropped because their row no longer exists.
    pub keys_not_found: u64,
    /// Keys dropped because their increment failed for another reason.
    pub keys_failed: u64,
    /// Flush tasks that panicked. The timer survives these.
    pub flush_panics: u64,
}
