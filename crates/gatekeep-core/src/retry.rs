// SPDX-License-Identifier: Apache-2.0

//! Retry logic with exponential backoff for transient failures.
//!
//! Wraps a fallible async operation and re-attempts it while its error is
//! classified as transient, sleeping between attempts according to the
//! [`backoff`](crate::backoff) calculation. Waits are non-blocking and can be
//! interrupted with a [`CancellationToken`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backoff;
use crate::error::{Classify, ErrorKind, RetryError};

/// Decides whether an error is worth retrying.
pub type RetryPredicate = Arc<dyn Fn(&dyn Classify) -> bool + Send + Sync>;

/// Called before each retry with the error, the 1-based retry number and the
/// delay in milliseconds.
pub type RetryHook = Arc<dyn Fn(&dyn Classify, u32, u64) + Send + Sync>;

/// Called once on terminal failure with the error and the number of attempts.
pub type FailureHook = Arc<dyn Fn(&dyn Classify, u32) + Send + Sync>;

/// Retry configuration.
///
/// Defaults: 3 retries, 1s initial delay, 30s cap, factor 2, jitter on.
/// Without an `is_retryable` predicate, only transient error kinds
/// (see [`ErrorKind::is_transient`]) are retried.
#[derive(Clone, Builder)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    #[builder(default = 3)]
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    #[builder(default = 1_000)]
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    #[builder(default = 30_000)]
    pub max_delay_ms: u64,
    /// Multiplier applied per retry.
    #[builder(default = 2.0)]
    pub backoff_factor: f64,
    /// Randomize delays to desynchronize concurrent callers.
    #[builder(default = true)]
    pub jitter: bool,
    /// Overrides the default retryability classification.
    pub is_retryable: Option<RetryPredicate>,
    /// Observability hook invoked before each retry.
    pub on_retry: Option<RetryHook>,
    /// Observability hook invoked on terminal failure.
    pub on_failure: Option<FailureHook>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .field("is_retryable", &self.is_retryable.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Policy for calls to the authentication backend.
    ///
    /// Fewer retries with a longer initial delay to keep load off the
    /// backend. Pair with [`execute_auth`].
    #[must_use]
    pub fn authentication() -> Self {
        Self::builder().max_retries(2).initial_delay_ms(1_500).build()
    }

    /// Whether `error` should be retried under this policy.
    #[must_use]
    pub fn should_retry(&self, error: &dyn Classify) -> bool {
        match &self.is_retryable {
            Some(predicate) => predicate(error),
            None => error.kind().is_transient(),
        }
    }

    fn notify_retry(&self, error: &dyn Classify, attempt: u32, delay_ms: u64) {
        if let Some(hook) = &self.on_retry {
            hook(error, attempt, delay_ms);
        }
    }

    fn notify_failure(&self, error: &dyn Classify, attempts: u32) {
        if let Some(hook) = &self.on_failure {
            hook(error, attempts);
        }
    }
}

/// Runs `operation` with retries, returning the last error unchanged when
/// all attempts fail.
///
/// At most `max_retries + 1` attempts are made.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    let never = CancellationToken::new();
    run(policy, &never, operation, false)
        .await
        .map_err(RetryError::into_inner)
}

/// Like [`execute`], but stops waiting as soon as `cancel` fires.
pub async fn execute_with_cancel<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    run(policy, cancel, operation, false).await
}

/// Retries an authentication call.
///
/// Credential errors are never retried, even if the policy's predicate
/// accepts them.
pub async fn execute_auth<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    let never = CancellationToken::new();
    run(policy, &never, operation, true)
        .await
        .map_err(RetryError::into_inner)
}

/// Like [`execute_auth`], but stops waiting as soon as `cancel` fires.
pub async fn execute_auth_with_cancel<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    run(policy, cancel, operation, true).await
}

/// Delay before retry `attempt`, honoring a server hint up to the cap.
fn retry_delay(attempt: u32, policy: &RetryPolicy, error: &dyn Classify) -> u64 {
    let computed = backoff::delay(attempt, policy);
    match error.retry_after_ms() {
        Some(hint) => computed.max(hint).min(policy.max_delay_ms),
        None => computed,
    }
}

async fn run<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
    credential_guard: bool,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify,
{
    let mut retry: u32 = 0;

    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let attempts = retry + 1;
        let kind = error.kind();
        let guarded = credential_guard && kind == ErrorKind::Credential;

        if guarded || !policy.should_retry(&error) {
            warn!(attempts, %kind, error = %error, "Operation failed with non-retryable error");
            policy.notify_failure(&error, attempts);
            return Err(RetryError::NonRetryable {
                attempts,
                last_error: error,
            });
        }

        if retry >= policy.max_retries {
            warn!(attempts, %kind, error = %error, "Retries exhausted");
            policy.notify_failure(&error, attempts);
            return Err(RetryError::Exhausted {
                attempts,
                last_error: error,
            });
        }

        let delay_ms = retry_delay(retry, policy, &error);
        debug!(attempt = attempts, delay_ms, %kind, "Retrying after transient failure");
        policy.notify_retry(&error, attempts, delay_ms);

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(attempts, "Retry wait cancelled");
                return Err(RetryError::Cancelled {
                    attempts,
                    last_error: error,
                });
            }
            () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }

        retry += 1;
    }
}
