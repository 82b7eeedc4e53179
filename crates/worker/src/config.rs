//! Worker configuration loaded from environment variables.

use std::time::Duration;

use orchestrator::{EngineConfig, RetryConfig};
use saga_store::RetentionPolicy;

/// Worker configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `STEP_TIMEOUT_MS` — per-step reply deadline (default: `30000`)
/// - `FORWARD_RETRY_ATTEMPTS` — forward-step attempts (default: `3`)
/// - `COMPENSATION_RETRY_ATTEMPTS` — compensation attempts (default: `5`)
/// - `RETENTION_DAYS` — terminal saga retention (default: `7`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct Config {
    pub step_timeout_ms: u64,
    pub forward_retry_attempts: u32,
    pub compensation_retry_attempts: u32,
    pub retention_days: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            step_timeout_ms: read_var("STEP_TIMEOUT_MS", 30_000),
            forward_retry_attempts: read_var("FORWARD_RETRY_ATTEMPTS", 3),
            compensation_retry_attempts: read_var("COMPENSATION_RETRY_ATTEMPTS", 5),
            retention_days: read_var("RETENTION_DAYS", 7),
        }
    }

    /// Engine configuration derived from this config.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            step_timeout: Duration::from_millis(self.step_timeout_ms),
            forward_retry: RetryConfig {
                max_attempts: self.forward_retry_attempts,
                ..RetryConfig::forward()
            },
            compensation_retry: RetryConfig {
                max_attempts: self.compensation_retry_attempts,
                ..RetryConfig::compensation()
            },
        }
    }

    /// Retention policy derived from this config.
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            retain_for: Duration::from_secs(self.retention_days * 24 * 60 * 60),
            ..RetentionPolicy::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            forward_retry_attempts: 3,
            compensation_retry_attempts: 5,
            retention_days: 7,
        }
    }
}

fn read_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
