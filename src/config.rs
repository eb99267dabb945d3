//! Runtime configuration, layered via the `config` crate: built-in defaults,
//! optional `swarmcore.toml`, then `SWARMCORE_*` environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::resilience::{Backoff, BreakerThresholds, RetryConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub request_timeout_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self { request_timeout_ms: 30_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let d = RetryConfig::default();
        Self {
            max_attempts: d.max_attempts,
            initial_delay_ms: d.initial_delay.as_millis() as u64,
            max_delay_ms: d.max_delay.as_millis() as u64,
            multiplier: d.multiplier,
            jitter: d.jitter,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            backoff: Backoff::Exponential,
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let d = BreakerThresholds::default();
        Self {
            failure_threshold: d.failure_threshold,
            success_threshold: d.success_threshold,
            open_timeout_ms: d.open_timeout.as_millis() as u64,
        }
    }
}

impl BreakerSettings {
    pub fn to_thresholds(&self) -> BreakerThresholds {
        BreakerThresholds {
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            open_timeout: Duration::from_millis(self.open_timeout_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_cap_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            reconnect_base_ms: 500,
            reconnect_cap_ms: 30_000,
            max_reconnect_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub bus: BusConfig,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,
    pub transport: TransportConfig,
    pub token_budget_max: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            transport: TransportConfig::default(),
            token_budget_max: 1_000_000,
        }
    }
}

impl RuntimeConfig {
    /// Loads defaults, then `path` if it exists, then `SWARMCORE_*` env vars
    /// (double-underscore separated, e.g. `SWARMCORE_RETRY__MAX_ATTEMPTS`).
    pub fn load(path: Option<&str>) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&RuntimeConfig::default()).map_err(config_err)?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SWARMCORE")
                .separator("__")
                .try_parsing(true),
        );
        let built = builder.build().map_err(config_err)?;
        built.try_deserialize().map_err(config_err)
    }
}

fn config_err(e: config::ConfigError) -> CoreError {
    CoreError::validation(format!("config error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_runtime_config_round_trips_through_retry_settings() {
        let cfg = RuntimeConfig::default();
        let retry = cfg.retry.to_retry_config();
        assert_eq!(retry.max_attempts, 3);
    }

    #[test]
    fn load_with_no_file_falls_back_to_defaults() {
        let cfg = RuntimeConfig::load(Some("/nonexistent/swarmcore")).unwrap();
        assert_eq!(cfg.token_budget_max, 1_000_000);
    }
}
