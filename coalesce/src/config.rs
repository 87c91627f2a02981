// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-domain counter settings, as loaded from the host application's config file.

use std::{fmt, time::Duration};

use serde::Deserialize;

/// Settings for the view and visit counters of one domain.
///
/// Every field has a default, so an empty table is a valid config:
///
/// ```
/// # use coalesce::CoalesceConfig;
/// let config: CoalesceConfig = serde_json::from_str(r#"{ "views_flush_interval_ms": 5000 }"#).unwrap();
/// assert_eq!(config.views_flush_interval_ms, 5000);
/// assert_eq!(config, CoalesceConfig { views_flush_interval_ms: 5000, ..Default::default() });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoalesceConfig {
    /// When false, views and visits are not recorded at all and no timers are started.
    pub enabled: bool,
    /// Flush period of the paste view counters, in milliseconds. Defaults to 10 000.
    pub views_flush_interval_ms: u64,
    /// Flush period of the short URL visit counters, in milliseconds. Defaults to 10 000.
    pub visits_flush_interval_ms: u64,
    /// Maximum number of concurrent increments per flush. Defaults to 8.
    pub apply_concurrency: usize,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            views_flush_interval_ms: 10_000,
            visits_flush_interval_ms: 10_000,
            apply_concurrency: 8,
        }
    }
}

impl CoalesceConfig {
    /// Flush period of the paste view counters.
    pub fn views_flush_interval(&self) -> Duration {
        Duration::from_millis(self.views_flush_interval_ms)
    }

    /// Flush period of the short URL visit counters.
    pub fn visits_flush_interval(&self) -> Duration {
        Duration::from_millis(self.visits_flush_interval_ms)
    }

    /// Check that every setting can be used to build a scheduler.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.views_flush_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("views_flush_interval_ms"));
        }
        if self.visits_flush_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("visits_flush_interval_ms"));
        }
        if self.apply_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        Ok(())
    }
}

/// An invalid [`CoalesceConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The named flush interval is zero.
    ZeroInterval(&'static str),
    /// `apply_concurrency` is zero.
    ZeroConcurrency,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroInterval(field) => write!(f, "`{field}` must be greater than zero"),
            Self::ZeroConcurrency => f.write_str("`apply_concurrency` must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}
