//! Optional LLM-backed planner. Falls back to the heuristic planner on any
//! transport or parse failure, or when the model's output doesn't validate.

use crate::heuristic::HeuristicPlanner;
use crate::planner::Planner;
use async_trait::async_trait;
use battle_healer_common::types::{HealingAction, HealingDecision, HealingState, Observation};
use serde::Deserialize;
use std::time::Duration;

const PROMPT_BODY_PREVIEW_BYTES: usize = 400;

/// Configuration for the LLM planner's HTTP endpoint.
#[derive(Debug, Clone)]
pub struct LlmPlannerConfig {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

/// Raw shape expected back from the model, validated before use.
#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    reason: String,
}

/// Planner backed by an external model. Builds a redacted prompt describing
/// the current state and last observation, and silently defers to the
/// heuristic planner whenever the round trip can't be trusted.
pub struct LlmPlanner {
    client: reqwest::Client,
    config: LlmPlannerConfig,
    fallback: HeuristicPlanner,
}

impl LlmPlanner {
    pub fn new(client: reqwest::Client, config: LlmPlannerConfig, fallback: HeuristicPlanner) -> Self {
        LlmPlanner { client, config, fallback }
    }

    async fn call_model(&self, state: &HealingState, observation: &Observation) -> Option<HealingDecision> {
        let prompt = build_prompt(state, observation);

        let response = self
            .client
            .post(&self.config.endpoint)
            .timeout(self.config.timeout)
            .json(&serde_json::json!({ "model": self.config.model, "prompt": prompt }))
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let raw: RawDecision = response.json().await.ok()?;
        validate_decision(raw)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, state: &HealingState, observation: &Observation) -> HealingDecision {
        match self.call_model(state, observation).await {
            Some(decision) => decision,
            None => {
                tracing::warn!("llm planner unavailable or invalid, falling back to heuristic");
                self.fallback.plan(state, observation).await
            }
        }
    }
}

fn validate_decision(raw: RawDecision) -> Option<HealingDecision> {
    let action = match raw.action.as_str() {
        "retry" => HealingAction::Retry,
        "refresh_token" => HealingAction::RefreshToken,
        "switch_region" => HealingAction::SwitchRegion,
        "repair_payload" => HealingAction::RepairPayload,
        "rewrite_request" => HealingAction::RewriteRequest,
        "adapt_schema" => HealingAction::AdaptSchema,
        "infer_schema" => HealingAction::InferSchema,
        "use_mock" => HealingAction::UseMock,
        "queue_recovery" => HealingAction::QueueRecovery,
        "abort" => HealingAction::Abort,
        _ => HealingAction::Retry,
    };

    Some(HealingDecision { action, reason: raw.reason, params: None })
}

fn build_prompt(state: &HealingState, observation: &Observation) -> String {
    let body_preview = state
        .request
        .body
        .as_ref()
        .map(|b| b.to_string())
        .unwrap_or_default();
    let truncated: String = body_preview.chars().take(PROMPT_BODY_PREVIEW_BYTES).collect();

    let sanitized_headers: Vec<&String> = state
        .request
        .headers
        .keys()
        .filter(|k| {
            let lower = k.to_ascii_lowercase();
            lower != "authorization" && lower != "proxy-authorization"
        })
        .collect();

    format!(
        "toolkit_actions=retry,refresh_token,switch_region,repair_payload,rewrite_request,adapt_schema,infer_schema,use_mock,queue_recovery,abort\n\
         cycle={cycle}\nregion={region:?}\nhas_token={has_token}\nheaders={headers:?}\n\
         status={status:?}\nerror_message={message}\nbody_preview={body}",
        cycle = state.cycles_used,
        region = state.current_region_id(),
        has_token = state.token.is_some(),
        headers = sanitized_headers,
        status = observation.error.status,
        message = observation.error.message,
        body = truncated,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use battle_healer_common::types::{RequestState, TransportError, TransportMeta};
    use chrono::Utc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn state() -> HealingState {
        HealingState::new("req-1", "corr-1", "/external-api", RequestState::new("POST"), vec!["".to_string()], 6)
    }

    fn observation() -> Observation {
        Observation {
            cycle: 0,
            meta: TransportMeta::new("corr-1"),
            error: TransportError { status: Some(503), message: "failed".to_string(), body: None },
            timestamp: Utc::now(),
            trigger_hints: None,
        }
    }

    #[tokio::test]
    async fn falls_back_to_heuristic_on_transport_failure() {
        let config = LlmPlannerConfig {
            endpoint: "http://127.0.0.1:0/does-not-exist".to_string(),
            model: "test-model".to_string(),
            timeout: Duration::from_millis(50),
        };
        let planner = LlmPlanner::new(reqwest::Client::new(), config, HeuristicPlanner::default());
        let decision = planner.plan(&state(), &observation()).await;
        assert_eq!(decision.action, HealingAction::SwitchRegion);
    }

    #[tokio::test]
    async fn uses_model_decision_when_valid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "action": "use_mock",
                "reason": "model decided to degrade"
            })))
            .mount(&server)
            .await;

        let config = LlmPlannerConfig {
            endpoint: server.uri(),
            model: "test-model".to_string(),
            timeout: Duration::from_secs(5),
        };
        let planner = LlmPlanner::new(reqwest::Client::new(), config, HeuristicPlanner::default());
        let decision = planner.plan(&state(), &observation()).await;
        assert_eq!(decision.action, HealingAction::UseMock);
    }

    #[tokio::test]
    async fn unknown_action_coerces_to_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "action": "do_a_backflip",
                "reason": "nonsense"
            })))
            .mount(&server)
            .await;

        let config = LlmPlannerConfig {
            endpoint: server.uri(),
            model: "test-model".to_string(),
            timeout: Duration::from_secs(5),
        };
        let planner = LlmPlanner::new(reqwest::Client::new(), config, HeuristicPlanner::default());
        let decision = planner.plan(&state(), &observation()).await;
        assert_eq!(decision.action, HealingAction::Retry);
    }
}
