//! Lightweight health/metrics types for inspection and dashboards.
//!
//! The dashboard itself is out of scope; this module only shapes the data
//! it would consume.

use crate::types::RegionHealth;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A coarse health score, ordered worst-to-best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Deprecated,
    Unhealthy,
    Healthy,
}

impl HealthLevel {
    pub fn as_score(&self) -> f64 {
        match self {
            HealthLevel::Deprecated => 0.0,
            HealthLevel::Unhealthy => 0.5,
            HealthLevel::Healthy => 1.0,
        }
    }
}

impl From<RegionHealth> for HealthLevel {
    fn from(h: RegionHealth) -> Self {
        match h {
            RegionHealth::Healthy => HealthLevel::Healthy,
            RegionHealth::Unhealthy => HealthLevel::Unhealthy,
            RegionHealth::Deprecated => HealthLevel::Deprecated,
        }
    }
}

/// Point-in-time health summary for a single region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component_id: String,
    pub level: HealthLevel,
    pub last_status: Option<u16>,
}

/// Aggregated view across every region known to the registry, suitable for
/// exposing to a dashboard or scraping into a metrics backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatedHealth {
    pub components: HashMap<String, ComponentHealth>,
}

impl AggregatedHealth {
    pub fn overall_score(&self) -> f64 {
        if self.components.is_empty() {
            return 1.0;
        }
        let total: f64 = self.components.values().map(|c| c.level.as_score()).sum();
        total / self.components.len() as f64
    }
}

/// Per-invocation cycle counters, useful for tracking Supervisor behavior
/// across a population of requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub cycles_used: u32,
    pub repair_attempts: u32,
    pub region_switches: u32,
    pub queued: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_level_orders_worst_to_best() {
        assert!(HealthLevel::Deprecated < HealthLevel::Unhealthy);
        assert!(HealthLevel::Unhealthy < HealthLevel::Healthy);
    }

    #[test]
    fn overall_score_averages_components() {
        let mut aggregated = AggregatedHealth::default();
        aggregated.components.insert(
            "a".to_string(),
            ComponentHealth {
                component_id: "a".to_string(),
                level: HealthLevel::Healthy,
                last_status: Some(200),
            },
        );
        aggregated.components.insert(
            "b".to_string(),
            ComponentHealth {
                component_id: "b".to_string(),
                level: HealthLevel::Unhealthy,
                last_status: Some(503),
            },
        );
        assert!((aggregated.overall_score() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_aggregation_is_perfectly_healthy() {
        assert_eq!(AggregatedHealth::default().overall_score(), 1.0);
    }
}
