// SPDX-License-Identifier: Apache-2.0

//! High-level entry points for guarded calls.
//!
//! [`Gatekeeper`] owns the process-wide failure tracker and lockout manager
//! and applies them around operations: it refuses calls that are cooling
//! down or accounts that are locked, runs the operation through the retry
//! executor, and feeds the terminal outcome back into the trackers.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::circuit_breaker::{CooldownProfile, FailureTracker};
use crate::clock::Clock;
use crate::config::GatekeepConfig;
use crate::error::{Classify, ErrorKind, GuardError};
use crate::lockout::LockoutManager;
use crate::retry::{self, RetryPolicy};

/// Defensive-throttling engine shared by all call sites in a process.
#[derive(Debug)]
pub struct Gatekeeper {
    tracker: FailureTracker,
    lockouts: LockoutManager,
    retry_policy: RetryPolicy,
    auth_policy: RetryPolicy,
}

impl Gatekeeper {
    /// Create a gatekeeper with default retry policies.
    #[must_use]
    pub fn new(profile: CooldownProfile, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker: FailureTracker::new(profile, Arc::clone(&clock)),
            lockouts: LockoutManager::new(clock),
            retry_policy: RetryPolicy::default(),
            auth_policy: RetryPolicy::authentication(),
        }
    }

    /// Build a gatekeeper from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns `GatekeepError::Config` if any section fails validation.
    pub fn from_config(config: &GatekeepConfig, clock: Arc<dyn Clock>) -> crate::Result<Self> {
        Ok(Self::new(config.circuit_breaker.to_profile()?, clock)
            .with_retry_policy(config.retry_policy()?)
            .with_auth_policy(config.auth_retry_policy()?))
    }

    /// Replace the retry policy used by [`call`](Self::call).
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replace the retry policy used by [`authenticate`](Self::authenticate).
    #[must_use]
    pub fn with_auth_policy(mut self, policy: RetryPolicy) -> Self {
        self.auth_policy = policy;
        self
    }

    /// The per-operation circuit breaker.
    #[must_use]
    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    /// The account lockout manager, for admin listing and unlock.
    #[must_use]
    pub fn lockouts(&self) -> &LockoutManager {
        &self.lockouts
    }

    /// Run `operation` under the circuit breaker for `key`.
    ///
    /// Refuses immediately while `key` is cooling down. Otherwise retries
    /// transient failures and records the terminal outcome against `key`.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::CoolingDown` without calling `operation`, or
    /// `GuardError::Operation` with the last error after retries.
    #[instrument(skip(self, operation))]
    pub async fn call<T, E, F, Fut>(&self, key: &str, operation: F) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let remaining_ms = self.tracker.remaining_cooldown(key);
        if remaining_ms > 0 {
            debug!(remaining_ms, "Call refused during cooldown");
            return Err(GuardError::CoolingDown {
                key: key.to_string(),
                remaining_ms,
            });
        }

        match retry::execute(&self.retry_policy, operation).await {
            Ok(value) => {
                self.tracker.record_success(key);
                Ok(value)
            }
            Err(err) => {
                self.tracker.record_failure(key);
                Err(GuardError::Operation(err))
            }
        }
    }

    /// Run a sign-in `operation` for `identifier` under the lockout policy.
    ///
    /// Refuses immediately while the account is locked. Credential failures
    /// count toward the lockout; transient backend failures do not.
    ///
    /// The lock is checked before the attempt and the failure is recorded
    /// after it, so sign-ins already in flight when the account locks still
    /// run to completion. Each of their credential failures is counted and
    /// escalates the lockout; only later calls are refused.
    ///
    /// # Errors
    ///
    /// Returns `GuardError::Locked` without calling `operation`, or
    /// `GuardError::Operation` with the last error after retries.
    #[instrument(skip(self, operation))]
    pub async fn authenticate<T, E, F, Fut>(
        &self,
        identifier: &str,
        operation: F,
    ) -> Result<T, GuardError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        if let Some(record) = self.lockouts.record(identifier)
            && self.lockouts.is_locked(identifier)
        {
            let remaining_ms = self.lockouts.remaining_lockout(identifier);
            debug!(level = record.lockout_level, remaining_ms, "Sign-in refused while locked");
            return Err(GuardError::Locked {
                level: record.lockout_level,
                remaining_ms,
            });
        }

        match retry::execute_auth(&self.auth_policy, operation).await {
            Ok(value) => {
                self.lockouts.record_success(identifier);
                Ok(value)
            }
            Err(err) => {
                if err.kind() == ErrorKind::Credential {
                    self.lockouts.record_failed_attempt(identifier);
                }
                Err(GuardError::Operation(err))
            }
        }
    }
}
