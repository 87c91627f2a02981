// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! View and visit counters of one hosted domain.

use coalesce_core::{CounterStore, DomainId, PasteId, ShortUrlId};

use crate::{
    BestEffortPerKeyApply, CoalesceConfig, ConfigError, Scheduler, SchedulerBuilder,
    SchedulerHandle, StatsSnapshot,
};

/// Scheduler coalescing paste bin views.
pub type ViewScheduler = Scheduler<PasteId>;

/// Scheduler coalescing short URL visits.
pub type VisitScheduler = Scheduler<ShortUrlId>;

struct Running {
    views: ViewScheduler,
    visits: VisitScheduler,
    views_handle: SchedulerHandle,
    visits_handle: SchedulerHandle,
}

/// The view and visit schedulers of one domain.
///
/// Created when the domain is initialized and shut down when it is torn down. Dropping it stops
/// both schedulers.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use coalesce::{CoalesceConfig, DomainCounters, DomainId, PasteId};
/// use coalesce_core::test_util::MemoryCounterStore;
///
/// let counters = DomainCounters::start(
///     DomainId::new("files.example.com"),
///     MemoryCounterStore::new(),
///     MemoryCounterStore::new(),
///     &CoalesceConfig::default(),
/// )
/// .unwrap();
///
/// counters.record_view(PasteId::new("p_1"));
/// counters.shutdown().await;
/// # }
/// ```
pub struct DomainCounters {
    domain: DomainId,
    running: Option<Running>,
}

impl DomainCounters {
    /// Start both schedulers of `domain`.
    ///
    /// Paste views are applied to `view_store` and short URL visits to `visit_store`, through
    /// [`BestEffortPerKeyApply`]. If `config.enabled` is false no scheduler is started and
    /// recording is a no-op.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime while `config.enabled` is true.
    pub fn start<V, U>(
        domain: DomainId,
        view_store: V,
        visit_store: U,
        config: &CoalesceConfig,
    ) -> Result<Self, ConfigError>
    where
        V: CounterStore<PasteId> + 'static,
        U: CounterStore<ShortUrlId> + 'static,
    {
        config.validate()?;
        if !config.enabled {
            tracing::info!(%domain, "view and visit counters are disabled");
            return Ok(Self::disabled(domain));
        }

        let (views, views_handle) = SchedulerBuilder::new()
            .name(format!("{domain}.views"))
            .flush_interval(config.views_flush_interval())
            .build(BestEffortPerKeyApply::new(view_store).concurrency(config.apply_concurrency));
        let (visits, visits_handle) = SchedulerBuilder::new()
            .name(format!("{domain}.visits"))
            .flush_interval(config.visits_flush_interval())
            .build(BestEffortPerKeyApply::new(visit_store).concurrency(config.apply_concurrency));

        Ok(Self {
            domain,
            running: Some(Running {
                views,
                visits,
                views_handle,
                visits_handle,
            }),
        })
    }

    /// Counters for `domain` that record nothing.
    pub fn disabled(domain: DomainId) -> Self {
        Self {
            domain,
            running: None,
        }
    }

    /// The domain these counters belong to.
    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    /// Whether the counters record anything.
    pub fn is_enabled(&self) -> bool {
        self.running.is_some()
    }

    /// Record a view of `paste`. Never blocks and never fails.
    pub fn record_view(&self, paste: PasteId) {
        if let Some(running) = &self.running {
            running.views.enqueue(paste);
        }
    }

    /// Record a visit of `url`. Never blocks and never fails.
    pub fn record_visit(&self, url: ShortUrlId) {
        if let Some(running) = &self.running {
            running.visits.enqueue(url);
        }
    }

    /// Producer side of the view scheduler, for handing to request handlers.
    pub fn views(&self) -> Option<&ViewScheduler> {
        self.running.as_ref().map(|running| &running.views)
    }

    /// Producer side of the visit scheduler, for handing to request handlers.
    pub fn visits(&self) -> Option<&VisitScheduler> {
        self.running.as_ref().map(|running| &running.visits)
    }

    /// Running totals of the view scheduler.
    pub fn view_stats(&self) -> Option<StatsSnapshot> {
        self.running
            .as_ref()
            .map(|running| running.views_handle.stats())
    }

    /// Running totals of the visit scheduler.
    pub fn visit_stats(&self) -> Option<StatsSnapshot> {
        self.running
            .as_ref()
            .map(|running| running.visits_handle.stats())
    }

    /// Stop both schedulers. See [`SchedulerHandle::stop`].
    pub fn stop(&self) {
        if let Some(running) = &self.running {
            running.views_handle.stop();
            running.visits_handle.stop();
        }
    }

    /// Stop both schedulers and wait for their in-flight flushes. See
    /// [`SchedulerHandle::shutdown`].
    pub async fn shutdown(&self) {
        if let Some(running) = &self.running {
            futures::future::join(
                running.views_handle.shutdown(),
                running.visits_handle.shutdown(),
            )
            .await;
        }
    }
}

impl std::fmt::Debug for DomainCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainCounters")
            .field("domain", &self.domain)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
