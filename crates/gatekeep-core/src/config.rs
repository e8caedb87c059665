// SPDX-License-Identifier: Apache-2.0

//! Configuration management for Gatekeep.
//!
//! Provides layered configuration from files and environment variables.
//! Uses XDG-compliant paths with environment variable support.
//!
//! # Configuration Sources (in priority order)
//!
//! 1. Environment variables (prefix: `GATEKEEP_`)
//! 2. Config file: `~/.config/gatekeep/config.toml`
//! 3. Built-in defaults
//!
//! Lockout levels and durations are fixed and cannot be configured.
//!
//! # Examples
//!
//! ```bash
//! # Allow five retries for generic calls
//! GATEKEEP_RETRY__MAX_RETRIES=5 my-service
//!
//! # Use the slow cooldown profile
//! GATEKEEP_CIRCUIT_BREAKER__PROFILE=slow my-service
//! ```

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::circuit_breaker::CooldownProfile;
use crate::error::GatekeepError;
use crate::retry::RetryPolicy;

/// Application configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GatekeepConfig {
    /// Retry settings for generic calls.
    pub retry: RetryConfig,
    /// Retry settings for authentication calls.
    pub auth_retry: RetryConfig,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl GatekeepConfig {
    /// Retry policy for generic calls.
    pub fn retry_policy(&self) -> crate::Result<RetryPolicy> {
        self.retry.apply(RetryPolicy::default())
    }

    /// Retry policy for authentication calls.
    pub fn auth_retry_policy(&self) -> crate::Result<RetryPolicy> {
        self.auth_retry.apply(RetryPolicy::authentication())
    }
}

/// Retry overrides. Unset fields keep the base policy's values.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: Option<u64>,
    /// Upper bound on any delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
    /// Multiplier applied per retry.
    pub backoff_factor: Option<f64>,
    /// Randomize delays.
    pub jitter: Option<bool>,
}

impl RetryConfig {
    /// Overlay these settings on `base` and validate the result.
    ///
    /// # Errors
    ///
    /// Returns `GatekeepError::Config` if `initial_delay_ms` exceeds
    /// `max_delay_ms` or the backoff factor is below 1 or not finite.
    pub fn apply(&self, base: RetryPolicy) -> crate::Result<RetryPolicy> {
        let policy = RetryPolicy {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            initial_delay_ms: self.initial_delay_ms.unwrap_or(base.initial_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            backoff_factor: self.backoff_factor.unwrap_or(base.backoff_factor),
            jitter: self.jitter.unwrap_or(base.jitter),
            ..base
        };

        if policy.initial_delay_ms > policy.max_delay_ms {
            return Err(GatekeepError::Config {
                message: format!(
                    "initial_delay_ms ({}) exceeds max_delay_ms ({})",
                    policy.initial_delay_ms, policy.max_delay_ms
                ),
            });
        }
        if !policy.backoff_factor.is_finite() || policy.backoff_factor < 1.0 {
            return Err(GatekeepError::Config {
                message: format!(
                    "backoff_factor must be a finite number >= 1.0, got {}",
                    policy.backoff_factor
                ),
            });
        }

        Ok(policy)
    }
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Named preset: "fast" or "slow".
    pub profile: String,
    /// Override for the failure threshold.
    pub threshold: Option<u32>,
    /// Override for the first cooldown, in milliseconds.
    pub base_cooldown_ms: Option<u64>,
    /// Override for the cooldown ceiling, in milliseconds.
    pub max_cooldown_ms: Option<u64>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            profile: "fast".to_string(),
            threshold: None,
            base_cooldown_ms: None,
            max_cooldown_ms: None,
        }
    }
}

impl CircuitBreakerConfig {
    /// Resolve the preset and overrides into a cooldown profile.
    ///
    /// # Errors
    ///
    /// Returns `GatekeepError::Config` for an unknown preset, a zero
    /// threshold, or a base cooldown above the ceiling.
    pub fn to_profile(&self) -> crate::Result<CooldownProfile> {
        let preset = match self.profile.to_lowercase().as_str() {
            "fast" => CooldownProfile::fast(),
            "slow" => CooldownProfile::slow(),
            other => {
                return Err(GatekeepError::Config {
                    message: format!(
                        "unknown circuit breaker profile '{other}' (expected fast or slow)"
                    ),
                });
            }
        };

        let profile = CooldownProfile {
            threshold: self.threshold.unwrap_or(preset.threshold),
            base_cooldown_ms: self.base_cooldown_ms.unwrap_or(preset.base_cooldown_ms),
            max_cooldown_ms: self.max_cooldown_ms.unwrap_or(preset.max_cooldown_ms),
        };

        if profile.threshold == 0 {
            return Err(GatekeepError::Config {
                message: "circuit breaker threshold must be at least 1".to_string(),
            });
        }
        if profile.base_cooldown_ms > profile.max_cooldown_ms {
            return Err(GatekeepError::Config {
                message: format!(
                    "base_cooldown_ms ({}) exceeds max_cooldown_ms ({})",
                    profile.base_cooldown_ms, profile.max_cooldown_ms
                ),
            });
        }

        Ok(profile)
    }
}

/// Returns the Gatekeep configuration directory.
///
/// Respects the `XDG_CONFIG_HOME` environment variable if set,
/// otherwise defaults to `~/.config/gatekeep`. Returns `None` when no home
/// directory can be determined.
#[must_use]
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME")
        && !xdg_config.is_empty()
    {
        return Some(PathBuf::from(xdg_config).join("gatekeep"));
    }
    dirs::home_dir().map(|home| home.join(".config").join("gatekeep"))
}

/// Returns the path to the configuration file.
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Load configuration from the default file location and the environment.
///
/// Environment variables use the prefix `GATEKEEP_` and double underscore
/// for nested keys (e.g., `GATEKEEP_RETRY__MAX_RETRIES`).
///
/// # Errors
///
/// Returns `GatekeepError::Config` if the config file exists but is invalid.
pub fn load_config() -> crate::Result<GatekeepConfig> {
    build(config_file_path().as_deref())
}

/// Load configuration from an explicit file (optional) and the environment.
///
/// # Errors
///
/// Returns `GatekeepError::Config` if the file is invalid.
pub fn load_config_from(path: &Path) -> crate::Result<GatekeepConfig> {
    build(Some(path))
}

fn build(path: Option<&Path>) -> crate::Result<GatekeepConfig> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        // Load from config file (optional - may not exist)
        builder = builder.add_source(File::from(path).required(false));
    }

    let config = builder
        // Override with environment variables
        .add_source(
            Environment::with_prefix("GATEKEEP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serial_test::serial;

    use super::*;

    fn from_toml(config_str: &str) -> GatekeepConfig {
        Config::builder()
            .add_source(config::File::from_str(config_str, config::FileFormat::Toml))
            .build()
            .expect("should build config")
            .try_deserialize()
            .expect("should deserialize")
    }

    #[test]
    #[serial]
    fn test_load_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("missing.toml")).expect("should load");

        let retry = config.retry_policy().unwrap();
        assert_eq!(retry.max_retries, 3);
        assert_eq!(retry.initial_delay_ms, 1_000);

        let auth = config.auth_retry_policy().unwrap();
        assert_eq!(auth.max_retries, 2);
        assert_eq!(auth.initial_delay_ms, 1_500);

        assert_eq!(
            config.circuit_breaker.to_profile().unwrap(),
            CooldownProfile::fast()
        );
    }

    #[test]
    fn test_partial_auth_retry_keeps_auth_defaults() {
        let config = from_toml(
            r"
[auth_retry]
max_retries = 1
",
        );

        let auth = config.auth_retry_policy().unwrap();
        assert_eq!(auth.max_retries, 1);
        assert_eq!(auth.initial_delay_ms, 1_500);
    }

    #[test]
    fn test_full_config_parses() {
        let config = from_toml(
            r#"
[retry]
max_retries = 5
initial_delay_ms = 200
max_delay_ms = 10000
backoff_factor = 3.0
jitter = false

[circuit_breaker]
profile = "slow"
threshold = 3
"#,
        );

        let retry = config.retry_policy().unwrap();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.initial_delay_ms, 200);
        assert_eq!(retry.max_delay_ms, 10_000);
        assert!((retry.backoff_factor - 3.0).abs() < f64::EPSILON);
        assert!(!retry.jitter);

        let profile = config.circuit_breaker.to_profile().unwrap();
        assert_eq!(profile.threshold, 3);
        assert_eq!(profile.base_cooldown_ms, 30_000);
        assert_eq!(profile.max_cooldown_ms, 24 * 60 * 60 * 1_000);
    }

    #[test]
    fn test_rejects_initial_delay_above_max() {
        let retry = RetryConfig {
            initial_delay_ms: Some(5_000),
            max_delay_ms: Some(1_000),
            ..RetryConfig::default()
        };
        let err = retry.apply(RetryPolicy::default()).unwrap_err();
        assert!(err.to_string().contains("initial_delay_ms"));
    }

    #[test]
    fn test_rejects_shrinking_backoff_factor() {
        let retry = RetryConfig {
            backoff_factor: Some(0.5),
            ..RetryConfig::default()
        };
        assert!(retry.apply(RetryPolicy::default()).is_err());
    }

    #[test]
    fn test_rejects_unknown_profile() {
        let cb = CircuitBreakerConfig {
            profile: "medium".to_string(),
            ..CircuitBreakerConfig::default()
        };
        let err = cb.to_profile().unwrap_err();
        assert!(err.to_string().contains("medium"));
    }

    #[test]
    fn test_rejects_zero_threshold_and_inverted_cooldowns() {
        let zero = CircuitBreakerConfig {
            threshold: Some(0),
            ..CircuitBreakerConfig::default()
        };
        assert!(zero.to_profile().is_err());

        let inverted = CircuitBreakerConfig {
            base_cooldown_ms: Some(600_000),
            ..CircuitBreakerConfig::default()
        };
        assert!(inverted.to_profile().is_err());
    }

    #[test]
    #[serial]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[retry]\nmax_retries = 9\n\n[circuit_breaker]\nprofile = \"slow\""
        )
        .unwrap();

        let config = load_config_from(file.path()).expect("should load file");
        assert_eq!(config.retry_policy().unwrap().max_retries, 9);
        assert_eq!(
            config.circuit_breaker.to_profile().unwrap(),
            CooldownProfile::slow()
        );
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry]\nmax_retries = 9").unwrap();

        unsafe {
            std::env::set_var("GATEKEEP_RETRY__MAX_RETRIES", "4");
        }
        let result = load_config_from(file.path());
        unsafe {
            std::env::remove_var("GATEKEEP_RETRY__MAX_RETRIES");
        }

        let config = result.expect("should load");
        assert_eq!(config.retry_policy().unwrap().max_retries, 4);
    }

    #[test]
    #[serial]
    fn test_config_dir_respects_xdg_config_home() {
        let original = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe {
            std::env::set_var("XDG_CONFIG_HOME", "/custom/config");
        }

        let dir = config_dir();
        assert_eq!(dir, Some(PathBuf::from("/custom/config/gatekeep")));
        assert_eq!(
            config_file_path(),
            Some(PathBuf::from("/custom/config/gatekeep/config.toml"))
        );

        // Cleanup
        unsafe {
            match original {
                Some(val) => std::env::set_var("XDG_CONFIG_HOME", val),
                None => std::env::remove_var("XDG_CONFIG_HOME"),
            }
        }
    }
}
