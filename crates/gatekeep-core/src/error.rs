// SPDX-License-Identifier: Apache-2.0

//! Error types and failure classification.
//!
//! Uses `thiserror` for deriving `std::error::Error` implementations.
//! Retry decisions dispatch on [`ErrorKind`], a closed set of failure
//! classes produced at the call boundary, instead of inspecting messages.

use std::fmt;

use thiserror::Error;

/// Errors raised by Gatekeep itself.
#[derive(Error, Debug)]
pub enum GatekeepError {
    /// Configuration file or value error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl From<config::ConfigError> for GatekeepError {
    fn from(err: config::ConfigError) -> Self {
        GatekeepError::Config {
            message: err.to_string(),
        }
    }
}

/// Failure class of an operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection refused, reset, DNS failure and similar.
    Network,
    /// Request or connect timeout (including HTTP 408).
    Timeout,
    /// Upstream throttling (HTTP 429 or backend rate limit).
    RateLimited,
    /// Upstream fault (HTTP 5xx or transient backend code).
    ServerError,
    /// Malformed input rejected by the upstream.
    Validation,
    /// Requested resource does not exist.
    NotFound,
    /// Invalid login or rejected credentials.
    Credential,
    /// Anything that could not be classified.
    Unknown,
}

impl ErrorKind {
    /// Returns `true` for failure classes worth retrying.
    ///
    /// Credential, validation, not-found and unknown errors fail fast.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::RateLimited
                | ErrorKind::ServerError
        )
    }

    /// Classifies an HTTP status code.
    ///
    /// # Arguments
    ///
    /// * `status` - HTTP status code as u16
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            408 => ErrorKind::Timeout,
            429 => ErrorKind::RateLimited,
            401 | 403 => ErrorKind::Credential,
            404 => ErrorKind::NotFound,
            400..=499 => ErrorKind::Validation,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }

    /// Classifies an error code reported by the managed backend.
    ///
    /// Recognises Postgres SQLSTATE codes surfaced through the data API and
    /// the auth service's error codes.
    #[must_use]
    pub fn from_backend_code(code: &str) -> Self {
        match code {
            // SQLSTATE class 08: connection exception
            c if c.len() == 5 && c.starts_with("08") => ErrorKind::Network,
            // admin_shutdown, cannot_connect_now, too_many_connections,
            // serialization_failure, deadlock_detected
            "57P01" | "57P03" | "53300" | "40001" | "40P01" => ErrorKind::ServerError,
            "over_request_rate_limit" => ErrorKind::RateLimited,
            "invalid_credentials" | "invalid_grant" => ErrorKind::Credential,
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Credential => "credential",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// An error that knows its failure class.
pub trait Classify: fmt::Display + fmt::Debug {
    /// The failure class used for retry and lockout decisions.
    fn kind(&self) -> ErrorKind;

    /// Server-provided minimum wait before retrying, in milliseconds.
    fn retry_after_ms(&self) -> Option<u64> {
        None
    }
}

/// A classified failure produced at a call boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct CallError {
    /// Failure class.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// HTTP status code, when the failure came from an HTTP response.
    pub status: Option<u16>,
    /// Server-provided retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl CallError {
    /// Create an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after_ms: None,
        }
    }

    /// Create an error from an HTTP status code.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::from_status(status),
            message: message.into(),
            status: Some(status),
            retry_after_ms: None,
        }
    }

    /// Create an error from a backend error code.
    pub fn from_backend_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::from_backend_code(code), message)
    }

    /// Attach a server-provided retry hint.
    #[must_use]
    pub fn with_retry_after_ms(mut self, retry_after_ms: u64) -> Self {
        self.retry_after_ms = Some(retry_after_ms);
        self
    }
}

impl Classify for CallError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn retry_after_ms(&self) -> Option<u64> {
        self.retry_after_ms
    }
}

impl Classify for reqwest::Error {
    fn kind(&self) -> ErrorKind {
        if self.is_timeout() {
            return ErrorKind::Timeout;
        }
        if self.is_connect() {
            return ErrorKind::Network;
        }
        if let Some(status) = self.status() {
            return ErrorKind::from_status(status.as_u16());
        }
        if self.is_request() {
            return ErrorKind::Network;
        }
        if (self.is_body() || self.is_decode()) && connection_dropped(self) {
            return ErrorKind::Network;
        }
        ErrorKind::Unknown
    }
}

/// Whether an I/O failure in the source chain means the peer went away.
///
/// A body cut short surfaces as a decode error with an I/O cause, unlike a
/// malformed payload.
fn connection_dropped(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io_err.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            );
        }
        source = cause.source();
    }
    false
}

impl Classify for anyhow::Error {
    fn kind(&self) -> ErrorKind {
        for cause in self.chain() {
            if let Some(call_err) = cause.downcast_ref::<CallError>() {
                return call_err.kind;
            }
            if let Some(req_err) = cause.downcast_ref::<reqwest::Error>() {
                return req_err.kind();
            }
        }
        ErrorKind::Unknown
    }

    fn retry_after_ms(&self) -> Option<u64> {
        self.chain()
            .find_map(|cause| cause.downcast_ref::<CallError>())
            .and_then(|call_err| call_err.retry_after_ms)
    }
}

/// Terminal failure of a retried operation.
#[derive(Error, Debug)]
pub enum RetryError<E> {
    /// Every allowed attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: E,
    },

    /// The operation failed with an error that must not be retried.
    #[error("non-retryable failure after {attempts} attempts: {last_error}")]
    NonRetryable {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: E,
    },

    /// The wait before the next attempt was cancelled.
    #[error("cancelled after {attempts} attempts: {last_error}")]
    Cancelled {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: E,
    },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::NonRetryable { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Borrow the last operation error.
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. }
            | RetryError::NonRetryable { last_error, .. }
            | RetryError::Cancelled { last_error, .. } => last_error,
        }
    }

    /// Returns the last operation error, unchanged.
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. }
            | RetryError::NonRetryable { last_error, .. }
            | RetryError::Cancelled { last_error, .. } => last_error,
        }
    }

    /// Returns `true` if the retry loop was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// Refusal or failure of a guarded call.
#[derive(Error, Debug)]
pub enum GuardError<E> {
    /// The operation key is in its cooldown window; the call was not made.
    #[error("operation '{key}' is cooling down for another {remaining_ms}ms")]
    CoolingDown {
        /// Operation key.
        key: String,
        /// Milliseconds until attempts are allowed again.
        remaining_ms: u64,
    },

    /// The account is locked; authentication was not attempted.
    #[error("account locked at level {level} for another {remaining_ms}ms")]
    Locked {
        /// Current lockout level (1-4).
        level: u8,
        /// Milliseconds until the lockout ends.
        remaining_ms: u64,
    },

    /// The operation ran and failed.
    #[error("{0}")]
    Operation(E),
}

impl<E> GuardError<E> {
    /// Returns the operation error, if the operation actually ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            GuardError::Operation(err) => Some(err),
            GuardError::CoolingDown { .. } | GuardError::Locked { .. } => None,
        }
    }
}
