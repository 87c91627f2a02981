// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

fn time_since_arbitrary_epoch() -> Duration {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    Instant::now().duration_since(*EPOCH.get_or_init(Instant::now))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Lets one log line through every `interval`.
///
/// Each scheduler owns its own limiters, so a store outage of one domain can't hide the failures
/// of another. Without a limit, an outage would produce one log line per key per flush.
#[derive(Debug)]
pub(crate) struct LogLimit {
    interval: Duration,
    // milliseconds since the epoch before which nothing is let through
    next_allowed: AtomicU64,
}

impl LogLimit {
    pub(crate) fn new(interval: Duration) -> Self {
        assert!(
            interval >= Duration::from_secs(1),
            "rate limit interval must be at least one second"
        );
        Self {
            interval,
            next_allowed: AtomicU64::new(u64::MIN),
        }
    }

    pub(crate) fn per_second() -> Self {
        Self::new(Duration::from_secs(1))
    }

    /// Returns true at most once per interval, across all threads sharing this limit.
    pub(crate) fn allow(&self) -> bool {
        let now = millis(time_since_arbitrary_epoch());
        let next = self.next_allowed.load(Ordering::Relaxed);
        if next > now {
            return false;
        }
        let new_next = now.saturating_add(millis(self.interval));
        self.next_allowed
            .compare_exchange(next, new_next, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
    }
}

/// `rate_limited!(limit, expr)` evaluates `expr` only if the [`LogLimit`] `limit` lets it through.
macro_rules! rate_limited {
    ($limit:expr, $call:expr) => {{
        if $crate::rate_limit::LogLimit::allow(&$limit) {
            $call;
        }
    }};
}
pub(crate) use rate_limited;
