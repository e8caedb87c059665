// SPDX-License-Identifier: Apache-2.0

//! Time source abstraction.
//!
//! All escalation and expiry logic reads time through [`Clock`] so that
//! cooldowns and lockouts can be exercised deterministically in tests.
//! Timestamps are Unix-epoch milliseconds.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Provides the current time in Unix-epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Returns the current time in milliseconds since `UNIX_EPOCH`.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Manually driven clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`.
    #[must_use]
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Jump to an absolute timestamp.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move time forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
