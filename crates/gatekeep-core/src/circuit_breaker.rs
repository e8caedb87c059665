// SPDX-License-Identifier: Apache-2.0

//! Per-operation circuit breaker with escalating cooldowns.
//!
//! Tracks consecutive failures per operation key. Once a key reaches the
//! failure threshold it enters a cooldown whose length doubles with each
//! further failure up to a ceiling. Cooldown expiry lets callers try again
//! without forgetting the count; only a recorded success returns the key to
//! a clear state.
//!
//! States per key:
//! - **Clear**: no entry, attempts allowed.
//! - **Failing**: `count < threshold`, attempts allowed.
//! - **Cooling**: `now < cooldown_until`, attempts refused.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::clock::Clock;

/// Cooldown escalation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownProfile {
    /// Consecutive failures before the first cooldown.
    pub threshold: u32,
    /// Cooldown at the threshold, in milliseconds.
    pub base_cooldown_ms: u64,
    /// Ceiling for any cooldown, in milliseconds.
    pub max_cooldown_ms: u64,
}

impl CooldownProfile {
    /// Generic operations: 5s base, 5 minute cap.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            threshold: 5,
            base_cooldown_ms: 5_000,
            max_cooldown_ms: 5 * 60 * 1_000,
        }
    }

    /// Higher-stakes operations: 30s base, 24 hour cap.
    #[must_use]
    pub fn slow() -> Self {
        Self {
            threshold: 5,
            base_cooldown_ms: 30_000,
            max_cooldown_ms: 24 * 60 * 60 * 1_000,
        }
    }

    /// Cooldown length after `count` consecutive failures, if any.
    #[must_use]
    pub fn cooldown_for(&self, count: u32) -> Option<u64> {
        if count < self.threshold {
            return None;
        }
        let doublings = count - self.threshold;
        let factor = 2u64.checked_pow(doublings).unwrap_or(u64::MAX);
        Some(
            self.base_cooldown_ms
                .saturating_mul(factor)
                .min(self.max_cooldown_ms),
        )
    }
}

impl Default for CooldownProfile {
    fn default() -> Self {
        Self::fast()
    }
}

/// Failure state for one operation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    /// Consecutive failures since the last success.
    pub count: u32,
    /// Time of the most recent failure (epoch ms).
    pub last_failure_at: u64,
    /// End of the current cooldown window (epoch ms).
    pub cooldown_until: Option<u64>,
}

/// Keyed circuit breaker shared across callers.
pub struct FailureTracker {
    profile: CooldownProfile,
    clock: Arc<dyn Clock>,
    entries: DashMap<String, FailureRecord>,
}

impl std::fmt::Debug for FailureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureTracker")
            .field("profile", &self.profile)
            .field("keys", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl FailureTracker {
    /// Create a tracker with the given cooldown profile.
    #[must_use]
    pub fn new(profile: CooldownProfile, clock: Arc<dyn Clock>) -> Self {
        Self {
            profile,
            clock,
            entries: DashMap::new(),
        }
    }

    /// The active cooldown profile.
    #[must_use]
    pub fn profile(&self) -> CooldownProfile {
        self.profile
    }

    /// Check if a call for `key` may proceed.
    #[must_use]
    pub fn should_attempt(&self, key: &str) -> bool {
        self.remaining_cooldown(key) == 0
    }

    /// Milliseconds until `key` leaves its cooldown (0 when not cooling).
    #[must_use]
    pub fn remaining_cooldown(&self, key: &str) -> u64 {
        let now = self.clock.now_ms();
        self.entries
            .get(key)
            .and_then(|entry| entry.cooldown_until)
            .map_or(0, |until| until.saturating_sub(now))
    }

    /// Record the outcome of a call for `key`.
    pub fn record_result(&self, key: &str, success: bool) {
        if success {
            self.record_success(key);
        } else {
            self.record_failure(key);
        }
    }

    /// Record a successful call, clearing any failure state for `key`.
    pub fn record_success(&self, key: &str) {
        if let Some((_, previous)) = self.entries.remove(key) {
            debug!(key, failures = previous.count, "Failure state cleared");
        }
    }

    /// Record a failed call for `key` and return the updated state.
    pub fn record_failure(&self, key: &str) -> FailureRecord {
        let now = self.clock.now_ms();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert(FailureRecord {
                count: 0,
                last_failure_at: now,
                cooldown_until: None,
            });

        entry.count = entry.count.saturating_add(1);
        entry.last_failure_at = now;

        if let Some(cooldown_ms) = self.profile.cooldown_for(entry.count) {
            entry.cooldown_until = Some(now.saturating_add(cooldown_ms));
            warn!(
                key,
                failures = entry.count,
                cooldown_ms,
                "Operation cooling down after repeated failures"
            );
        }

        *entry
    }

    /// Current failure state for `key`, if it has failed since its last success.
    #[must_use]
    pub fn record(&self, key: &str) -> Option<FailureRecord> {
        self.entries.get(key).map(|entry| *entry)
    }
}
