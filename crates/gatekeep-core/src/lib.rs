// SPDX-License-Identifier: Apache-2.0

#![warn(missing_docs)]

//! # Gatekeep Core
//!
//! Defensive throttling for authentication flows and unreliable calls.
//!
//! This crate provides:
//! - A retry executor with exponential backoff and jitter
//! - A per-operation circuit breaker with escalating cooldowns
//! - Progressive account lockout with an administrative unlock path
//!
//! State is held in memory for the lifetime of the process. Hosts create
//! one [`Gatekeeper`] and share it between request handlers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gatekeep_core::{CallError, CooldownProfile, Gatekeeper, GuardError, SystemClock};
//!
//! # async fn example() {
//! let gatekeeper = Gatekeeper::new(CooldownProfile::fast(), Arc::new(SystemClock));
//!
//! let session: Result<String, GuardError<CallError>> = gatekeeper
//!     .authenticate("user@example.com", || async {
//!         // Call the authentication backend here
//!         Ok("session-token".to_string())
//!     })
//!     .await;
//!
//! match session {
//!     Ok(token) => println!("signed in: {token}"),
//!     Err(GuardError::Locked { remaining_ms, .. }) => {
//!         println!("try again in {}s", remaining_ms / 1_000);
//!     }
//!     Err(err) => println!("sign-in failed: {err}"),
//! }
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`backoff`] - Delay calculation
//! - [`retry`] - Retry executor and policy
//! - [`circuit_breaker`] - Per-operation failure tracking
//! - [`lockout`] - Account lockout
//! - [`facade`] - Combined entry points
//! - [`config`] - Configuration loading
//! - [`clock`] - Time sources
//! - [`error`] - Error types and classification

// ============================================================================
// Error Handling
// ============================================================================

pub use error::{CallError, Classify, ErrorKind, GatekeepError, GuardError, RetryError};

/// Convenience Result type for Gatekeep operations.
///
/// This is equivalent to `std::result::Result<T, GatekeepError>`.
pub type Result<T> = std::result::Result<T, GatekeepError>;

// ============================================================================
// Configuration
// ============================================================================

pub use config::{
    CircuitBreakerConfig, GatekeepConfig, RetryConfig, config_dir, config_file_path, load_config,
    load_config_from,
};

// ============================================================================
// Time
// ============================================================================

pub use clock::{Clock, ManualClock, SystemClock};

// ============================================================================
// Retry Logic
// ============================================================================

pub use retry::{
    FailureHook, RetryHook, RetryPolicy, RetryPredicate, execute, execute_auth,
    execute_auth_with_cancel, execute_with_cancel,
};

// ============================================================================
// Circuit Breaker
// ============================================================================

pub use circuit_breaker::{CooldownProfile, FailureRecord, FailureTracker};

// ============================================================================
// Account Lockout
// ============================================================================

pub use lockout::{LockedAccount, LockoutManager, LockoutRecord, lockout_duration_ms};

// ============================================================================
// Facade
// ============================================================================

pub use facade::Gatekeeper;

// ============================================================================
// Modules
// ============================================================================

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod error;
pub mod facade;
pub mod lockout;
pub mod retry;
