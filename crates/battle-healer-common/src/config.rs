//! Configuration tree, loadable from TOML via `serde`, with defaults matching
//! the values documented for the transport, repair and degradation subsystems.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for a battle-healer deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub repair: RepairConfig,
    pub degradation: DegradationConfig,
    pub supervisor: SupervisorConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            transport: TransportConfig::default(),
            repair: RepairConfig::default(),
            degradation: DegradationConfig::default(),
            supervisor: SupervisorConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl Config {
    /// Parses a TOML document into a `Config`, falling back to documented
    /// defaults for any omitted section.
    pub fn from_toml(raw: &str) -> crate::error::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Configuration(e.to_string()))
    }
}

/// Status codes treated as retryable by default: 429 and every 5xx.
fn default_retry_status_codes() -> Vec<u16> {
    let mut codes = vec![429];
    codes.extend(500..=599);
    codes
}

/// Per-request retry, backoff and region-rotation behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retry_status_codes: Vec<u16>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_ratio: f64,
    pub default_regions: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            max_retries: 2,
            retry_status_codes: default_retry_status_codes(),
            backoff_base_ms: 300,
            backoff_max_ms: 3_000,
            jitter_ratio: 0.25,
            default_regions: vec![String::new()],
        }
    }
}

impl TransportConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

/// Bounds on payload repair attempts, both per-state and per-endpoint-window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub max_repair_attempts: u32,
    pub repair_window_ms: u64,
    pub repair_window_limit: u32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        RepairConfig {
            max_repair_attempts: 2,
            repair_window_ms: 60_000,
            repair_window_limit: 4,
        }
    }
}

/// Stale-cache and synthetic-mock fallback behavior at the end of a healing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DegradationConfig {
    pub enable_stale_cache: bool,
    pub enable_mock: bool,
    pub stale_ttl_ms: u64,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        DegradationConfig {
            enable_stale_cache: true,
            enable_mock: true,
            stale_ttl_ms: 300_000,
        }
    }
}

/// Outer cycle-loop bounds for the Supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub max_cycles: u32,
    pub retry_budget_window_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        SupervisorConfig {
            max_cycles: 6,
            retry_budget_window_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Logging / tracing bootstrap knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json_output: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            log_level: "info".to_string(),
            json_output: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.transport.max_retries, 2);
        assert_eq!(config.transport.backoff_base_ms, 300);
        assert_eq!(config.transport.backoff_max_ms, 3_000);
        assert!((config.transport.jitter_ratio - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.repair.max_repair_attempts, 2);
        assert_eq!(config.repair.repair_window_ms, 60_000);
        assert_eq!(config.repair.repair_window_limit, 4);
        assert_eq!(config.degradation.stale_ttl_ms, 300_000);
        assert!(config.degradation.enable_stale_cache);
        assert!(config.degradation.enable_mock);
        assert_eq!(config.supervisor.max_cycles, 6);
    }

    #[test]
    fn retry_status_codes_cover_429_and_5xx() {
        let codes = default_retry_status_codes();
        assert!(codes.contains(&429));
        assert!(codes.contains(&500));
        assert!(codes.contains(&599));
        assert!(!codes.contains(&404));
    }

    #[test]
    fn from_toml_overrides_only_specified_fields() {
        let config = Config::from_toml("[transport]\nmax_retries = 5\n").unwrap();
        assert_eq!(config.transport.max_retries, 5);
        assert_eq!(config.transport.backoff_base_ms, 300);
        assert_eq!(config.repair.max_repair_attempts, 2);
    }
}
