//! Mandatory baseline planner: a deterministic dispatch table over the
//! failed Transport's status code and any schema-drift hints it carried.

use crate::planner::Planner;
use async_trait::async_trait;
use battle_healer_common::types::{
    DecisionParams, HealingAction, HealingDecision, HealingState, Observation,
};
use serde_json::Value;
use std::collections::HashMap;

/// Configuration for the heuristic planner's dispatch table.
#[derive(Debug, Clone)]
pub struct HeuristicPlannerConfig {
    /// Whether 422s should be handled via `rewrite_request` (true) or the
    /// more conservative `repair_payload` (false).
    pub enable_rewrite: bool,
}

impl Default for HeuristicPlannerConfig {
    fn default() -> Self {
        HeuristicPlannerConfig { enable_rewrite: true }
    }
}

/// Mandatory fallback planner. Every `LlmPlanner` falls back to one of
/// these on any transport or parse failure.
#[derive(Debug, Clone, Default)]
pub struct HeuristicPlanner {
    config: HeuristicPlannerConfig,
}

impl HeuristicPlanner {
    pub fn new(config: HeuristicPlannerConfig) -> Self {
        HeuristicPlanner { config }
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(&self, _state: &HealingState, observation: &Observation) -> HealingDecision {
        if let Some(hints) = extract_schema_hint(observation) {
            return HealingDecision {
                action: HealingAction::AdaptSchema,
                reason: "schema drift hint present in failure body".to_string(),
                params: Some(hints),
            };
        }

        match observation.error.status {
            Some(401) => HealingDecision {
                action: HealingAction::RefreshToken,
                reason: "401 unauthorized".to_string(),
                params: None,
            },
            Some(503) => {
                let remaining = retry_budget_remaining(observation);
                if remaining <= 0 {
                    HealingDecision {
                        action: HealingAction::QueueRecovery,
                        reason: "503 with no retry budget remaining".to_string(),
                        params: Some(DecisionParams::QueueRecovery {
                            endpoint: None,
                            provider: None,
                            delay_seconds: Some(30),
                        }),
                    }
                } else if remaining <= 1 {
                    HealingDecision {
                        action: HealingAction::UseMock,
                        reason: "503 with low retry budget".to_string(),
                        params: Some(DecisionParams::UseMock {
                            reason: Some("low retry budget".to_string()),
                            endpoint: None,
                            provider: None,
                        }),
                    }
                } else {
                    HealingDecision {
                        action: HealingAction::SwitchRegion,
                        reason: "503 service unavailable".to_string(),
                        params: Some(DecisionParams::SwitchRegion {}),
                    }
                }
            }
            Some(422) => {
                if self.config.enable_rewrite {
                    HealingDecision {
                        action: HealingAction::RewriteRequest,
                        reason: "422 unprocessable entity".to_string(),
                        params: Some(DecisionParams::RewriteRequest {
                            body: observation.trigger_hints.clone(),
                            headers: None,
                            notes: None,
                        }),
                    }
                } else {
                    HealingDecision {
                        action: HealingAction::RepairPayload,
                        reason: "422 unprocessable entity, rewrite disabled".to_string(),
                        params: Some(DecisionParams::RepairPayload {}),
                    }
                }
            }
            Some(429) => {
                if body_mentions_quota(observation) {
                    HealingDecision {
                        action: HealingAction::UseMock,
                        reason: "429 quota/rate limit exceeded".to_string(),
                        params: Some(DecisionParams::UseMock {
                            reason: Some("quota exceeded".to_string()),
                            endpoint: None,
                            provider: None,
                        }),
                    }
                } else {
                    HealingDecision {
                        action: HealingAction::QueueRecovery,
                        reason: "429 rate limited".to_string(),
                        params: Some(DecisionParams::QueueRecovery {
                            endpoint: None,
                            provider: None,
                            delay_seconds: Some(15),
                        }),
                    }
                }
            }
            Some(402) => HealingDecision {
                action: HealingAction::UseMock,
                reason: "402 payment required".to_string(),
                params: Some(DecisionParams::UseMock {
                    reason: Some("payment required".to_string()),
                    endpoint: None,
                    provider: None,
                }),
            },
            _ => HealingDecision {
                action: HealingAction::Retry,
                reason: "no specific handling for this status, retrying".to_string(),
                params: Some(DecisionParams::Retry { reason: None }),
            },
        }
    }
}

fn extract_schema_hint(observation: &Observation) -> Option<DecisionParams> {
    let candidate = observation
        .error
        .body
        .as_ref()
        .and_then(|body| body.get("detail"))
        .and_then(|detail| detail.get("schema_hint"))
        .or_else(|| {
            observation
                .trigger_hints
                .as_ref()
                .and_then(|hints| hints.get("schema_hint"))
        })?;

    let has_mapping_key = ["field_map", "mapping", "fields", "fallbacks", "defaults"]
        .iter()
        .any(|key| candidate.get(key).is_some());
    if !has_mapping_key {
        return None;
    }

    let field_map = first_object_of(candidate, &["field_map", "mapping", "fields", "fallbacks"])
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect::<HashMap<_, _>>()
        })
        .filter(|m| !m.is_empty());

    let defaults = candidate
        .get("defaults")
        .and_then(|d| d.as_object())
        .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect::<HashMap<_, _>>())
        .filter(|m| !m.is_empty());

    Some(DecisionParams::AdaptSchema { field_map, defaults })
}

fn first_object_of<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a serde_json::Map<String, Value>> {
    keys.iter().find_map(|key| value.get(key).and_then(|v| v.as_object()))
}

fn retry_budget_remaining(observation: &Observation) -> i64 {
    observation
        .error
        .body
        .as_ref()
        .and_then(|body| body.get("detail"))
        .and_then(|detail| detail.get("retry_budget_remaining"))
        .and_then(|v| v.as_i64())
        .unwrap_or(i64::MAX)
}

fn body_mentions_quota(observation: &Observation) -> bool {
    let message = observation
        .error
        .body
        .as_ref()
        .and_then(|body| body.get("detail"))
        .and_then(|detail| detail.get("error"))
        .and_then(|v| v.as_str())
        .unwrap_or(&observation.error.message)
        .to_ascii_lowercase();

    ["quota", "rate", "limit"].iter().any(|kw| message.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use battle_healer_common::types::{TransportError, TransportMeta};
    use chrono::Utc;

    fn observation(status: u16, body: Option<Value>) -> Observation {
        Observation {
            cycle: 0,
            meta: TransportMeta::new("corr-1"),
            error: TransportError { status: Some(status), message: "failed".to_string(), body },
            timestamp: Utc::now(),
            trigger_hints: None,
        }
    }

    fn state() -> HealingState {
        HealingState::new(
            "req-1",
            "corr-1",
            "/external-api",
            battle_healer_common::types::RequestState::new("POST"),
            vec!["".to_string()],
            6,
        )
    }

    #[tokio::test]
    async fn dispatches_401_to_refresh_token() {
        let planner = HeuristicPlanner::default();
        let decision = planner.plan(&state(), &observation(401, None)).await;
        assert_eq!(decision.action, HealingAction::RefreshToken);
    }

    #[tokio::test]
    async fn dispatches_503_with_no_budget_to_queue_recovery() {
        let planner = HeuristicPlanner::default();
        let body = serde_json::json!({"detail": {"retry_budget_remaining": 0}});
        let decision = planner.plan(&state(), &observation(503, Some(body))).await;
        assert_eq!(decision.action, HealingAction::QueueRecovery);
    }

    #[tokio::test]
    async fn dispatches_503_with_low_budget_to_use_mock() {
        let planner = HeuristicPlanner::default();
        let body = serde_json::json!({"detail": {"retry_budget_remaining": 1}});
        let decision = planner.plan(&state(), &observation(503, Some(body))).await;
        assert_eq!(decision.action, HealingAction::UseMock);
    }

    #[tokio::test]
    async fn dispatches_503_with_healthy_budget_to_switch_region() {
        let planner = HeuristicPlanner::default();
        let body = serde_json::json!({"detail": {"retry_budget_remaining": 5}});
        let decision = planner.plan(&state(), &observation(503, Some(body))).await;
        assert_eq!(decision.action, HealingAction::SwitchRegion);
    }

    #[tokio::test]
    async fn dispatches_422_to_rewrite_request_by_default() {
        let planner = HeuristicPlanner::default();
        let decision = planner.plan(&state(), &observation(422, None)).await;
        assert_eq!(decision.action, HealingAction::RewriteRequest);
    }

    #[tokio::test]
    async fn dispatches_422_to_repair_payload_when_rewrite_disabled() {
        let planner = HeuristicPlanner::new(HeuristicPlannerConfig { enable_rewrite: false });
        let decision = planner.plan(&state(), &observation(422, None)).await;
        assert_eq!(decision.action, HealingAction::RepairPayload);
    }

    #[tokio::test]
    async fn dispatches_429_quota_message_to_use_mock() {
        let planner = HeuristicPlanner::default();
        let body = serde_json::json!({"detail": {"error": "quota exceeded"}});
        let decision = planner.plan(&state(), &observation(429, Some(body))).await;
        assert_eq!(decision.action, HealingAction::UseMock);
    }

    #[tokio::test]
    async fn dispatches_429_without_quota_message_to_queue_recovery() {
        let planner = HeuristicPlanner::default();
        let decision = planner.plan(&state(), &observation(429, None)).await;
        assert_eq!(decision.action, HealingAction::QueueRecovery);
    }

    #[tokio::test]
    async fn dispatches_402_to_use_mock() {
        let planner = HeuristicPlanner::default();
        let decision = planner.plan(&state(), &observation(402, None)).await;
        assert_eq!(decision.action, HealingAction::UseMock);
    }

    #[tokio::test]
    async fn default_dispatch_is_retry() {
        let planner = HeuristicPlanner::default();
        let decision = planner.plan(&state(), &observation(418, None)).await;
        assert_eq!(decision.action, HealingAction::Retry);
    }

    #[tokio::test]
    async fn schema_drift_hint_takes_priority_over_status_dispatch() {
        let planner = HeuristicPlanner::default();
        let body = serde_json::json!({
            "detail": {
                "schema_hint": {
                    "field_map": {"amount": "total_amount"},
                    "defaults": {"currency": "USD"}
                }
            }
        });
        let decision = planner.plan(&state(), &observation(401, Some(body))).await;
        assert_eq!(decision.action, HealingAction::AdaptSchema);
    }
}
