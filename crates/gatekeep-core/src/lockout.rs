// SPDX-License-Identifier: Apache-2.0

//! Progressive account lockout for brute-force protection.
//!
//! Failed sign-ins are tracked per account identifier. Five failures within
//! a 15 minute window lock the account at level 1; every further failure,
//! during the lockout or after it expires, escalates one level:
//!
//! | Level | Duration   |
//! |-------|------------|
//! | 1     | 15 minutes |
//! | 2     | 60 minutes |
//! | 3     | 24 hours   |
//! | 4     | 7 days     |
//!
//! Expiry unlocks the account but keeps its level, so an attacker resuming
//! after a lockout lands on the next level instead of starting over. Only a
//! successful sign-in or an administrative unlock forgets the history.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;

/// Highest lockout level.
pub const MAX_LOCKOUT_LEVEL: u8 = 4;

/// Window in which level-0 failures are counted toward the first lockout.
pub const ATTEMPT_WINDOW_MS: u64 = 15 * MINUTE_MS;

const MINUTE_MS: u64 = 60 * 1_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

const LEVEL_DURATIONS_MS: [u64; MAX_LOCKOUT_LEVEL as usize] =
    [15 * MINUTE_MS, HOUR_MS, DAY_MS, 7 * DAY_MS];

/// Cumulative failed attempts needed to reach each level.
const LEVEL_THRESHOLDS: [u32; MAX_LOCKOUT_LEVEL as usize] = [5, 6, 7, 8];

/// Fixed lockout duration for `level`, or `None` for level 0 and out-of-range
/// values.
#[must_use]
pub fn lockout_duration_ms(level: u8) -> Option<u64> {
    match level {
        1..=MAX_LOCKOUT_LEVEL => Some(LEVEL_DURATIONS_MS[usize::from(level - 1)]),
        _ => None,
    }
}

fn attempts_for_level(level: u8) -> u32 {
    LEVEL_THRESHOLDS[usize::from(level.clamp(1, MAX_LOCKOUT_LEVEL) - 1)]
}

fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

/// Lockout state for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LockoutRecord {
    /// Current level, 0 when never locked.
    pub lockout_level: u8,
    /// End of the current or most recent lockout (epoch ms).
    pub lockout_until: Option<u64>,
    /// Failed attempts counted toward the current and next level.
    pub recent_attempts: u32,
    /// Time of the oldest counted attempt (epoch ms).
    pub first_attempt_at: u64,
}

impl LockoutRecord {
    fn new(now: u64) -> Self {
        Self {
            lockout_level: 0,
            lockout_until: None,
            recent_attempts: 0,
            first_attempt_at: now,
        }
    }

    /// Whether the record blocks sign-in at time `now`.
    #[must_use]
    pub fn is_locked_at(&self, now: u64) -> bool {
        self.lockout_level > 0 && self.lockout_until.is_some_and(|until| until > now)
    }

    /// Milliseconds of lockout left at time `now`.
    #[must_use]
    pub fn remaining_at(&self, now: u64) -> u64 {
        if self.lockout_level == 0 {
            return 0;
        }
        self.lockout_until.map_or(0, |until| until.saturating_sub(now))
    }
}

/// A currently locked account, as shown to administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedAccount {
    /// Normalized account identifier.
    pub identifier: String,
    /// Current level (1-4).
    pub lockout_level: u8,
    /// End of the lockout (epoch ms).
    pub lockout_until: u64,
    /// Failed attempts on record.
    pub recent_attempts: u32,
    /// Time of the oldest counted attempt (epoch ms).
    pub first_attempt_at: u64,
    /// Milliseconds until the lockout ends.
    pub remaining_ms: u64,
}

/// Tracks failed sign-ins and lockouts per account.
pub struct LockoutManager {
    clock: Arc<dyn Clock>,
    records: DashMap<String, LockoutRecord>,
}

impl std::fmt::Debug for LockoutManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutManager")
            .field("accounts", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl LockoutManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            records: DashMap::new(),
        }
    }

    /// Record a failed sign-in and escalate the lockout when a threshold is
    /// crossed. Returns the updated record.
    pub fn record_failed_attempt(&self, identifier: &str) -> LockoutRecord {
        let id = normalize(identifier);
        let now = self.clock.now_ms();
        let mut entry = self
            .records
            .entry(id.clone())
            .or_insert_with(|| LockoutRecord::new(now));
        let record = entry.value_mut();

        if record.lockout_level == 0
            && now.saturating_sub(record.first_attempt_at) > ATTEMPT_WINDOW_MS
        {
            record.recent_attempts = 0;
            record.first_attempt_at = now;
        }

        record.recent_attempts = record.recent_attempts.saturating_add(1);

        let next_level = (record.lockout_level + 1).min(MAX_LOCKOUT_LEVEL);
        if record.recent_attempts >= attempts_for_level(next_level) {
            let duration_ms = LEVEL_DURATIONS_MS[usize::from(next_level - 1)];
            record.lockout_level = next_level;
            record.lockout_until = Some(now.saturating_add(duration_ms));
            warn!(
                identifier = %id,
                level = next_level,
                attempts = record.recent_attempts,
                duration_ms,
                "Account locked"
            );
        } else {
            debug!(identifier = %id, attempts = record.recent_attempts, "Failed sign-in recorded");
        }

        *record
    }

    /// Forget all failure history after a successful sign-in.
    pub fn record_success(&self, identifier: &str) {
        let id = normalize(identifier);
        if let Some((_, previous)) = self.records.remove(&id)
            && previous.lockout_level > 0
        {
            info!(identifier = %id, level = previous.lockout_level, "Lockout history cleared");
        }
    }

    /// Whether sign-in is currently blocked for `identifier`.
    #[must_use]
    pub fn is_locked(&self, identifier: &str) -> bool {
        let now = self.clock.now_ms();
        self.records
            .get(&normalize(identifier))
            .is_some_and(|record| record.is_locked_at(now))
    }

    /// Milliseconds until `identifier` may sign in again (0 when unlocked).
    #[must_use]
    pub fn remaining_lockout(&self, identifier: &str) -> u64 {
        let now = self.clock.now_ms();
        self.records
            .get(&normalize(identifier))
            .map_or(0, |record| record.remaining_at(now))
    }

    /// Current record for `identifier`, including expired lockout history.
    #[must_use]
    pub fn record(&self, identifier: &str) -> Option<LockoutRecord> {
        self.records
            .get(&normalize(identifier))
            .map(|record| *record)
    }

    /// All accounts locked right now, sorted by identifier.
    ///
    /// Also drops level-0 records whose attempt window has elapsed.
    #[must_use]
    pub fn list_locked_accounts(&self) -> Vec<LockedAccount> {
        let now = self.clock.now_ms();
        self.prune_stale(now);
        let mut locked: Vec<LockedAccount> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_locked_at(now))
            .map(|entry| {
                let record = entry.value();
                let lockout_until = record.lockout_until.unwrap_or(now);
                LockedAccount {
                    identifier: entry.key().clone(),
                    lockout_level: record.lockout_level,
                    lockout_until,
                    recent_attempts: record.recent_attempts,
                    first_attempt_at: record.first_attempt_at,
                    remaining_ms: lockout_until.saturating_sub(now),
                }
            })
            .collect();
        locked.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        locked
    }

    fn prune_stale(&self, now: u64) {
        let before = self.records.len();
        self.records.retain(|_, record| {
            record.lockout_level > 0
                || now.saturating_sub(record.first_attempt_at) <= ATTEMPT_WINDOW_MS
        });
        let pruned = before.saturating_sub(self.records.len());
        if pruned > 0 {
            debug!(pruned, "Dropped stale failed-attempt records");
        }
    }

    /// Clear `identifier` unconditionally. Returns `true` if a record existed.
    ///
    /// Callers must verify the administrative capability beforehand.
    pub fn admin_unlock(&self, identifier: &str) -> bool {
        let id = normalize(identifier);
        match self.records.remove(&id) {
            Some((_, previous)) => {
                info!(
                    identifier = %id,
                    level = previous.lockout_level,
                    "Account unlocked by administrator"
                );
                true
            }
            None => false,
        }
    }
}
