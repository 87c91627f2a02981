// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use coalesce_core::{
    ApplyBatch, ApplyReport, CounterStore, Counts, DomainId, PasteId, ShortUrlId, StoreError,
};

pub use crate::best_effort::BestEffortPerKeyApply;
pub use crate::config::{CoalesceConfig, ConfigError};
pub use crate::domain::{DomainCounters, ViewScheduler, VisitScheduler};
pub use crate::scheduler::{Scheduler, SchedulerBuilder, SchedulerHandle};
pub use crate::stats::StatsSnapshot;

mod best_effort;
pub mod config;
pub mod domain;
pub(crate) mod rate_limit;
mod scheduler;
mod stats;

/// In-memory counter store for tests. Requires the `test-util` feature.
#[cfg(feature = "test-util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub use coalesce_core::test_util;
