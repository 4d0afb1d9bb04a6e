//! Outer cycle loop: Transport -> Planner -> Toolkit, cycle-bounded, ending
//! in success, a terminal decision, or the degradation pipeline.

use crate::cache::ResponseCache;
use crate::collaborators::{LogClient, MockClient};
use crate::schema;
use crate::toolkit::Toolkit;
use async_trait::async_trait;
use battle_healer_common::config::{DegradationConfig, TransportConfig};
use battle_healer_common::error::Result;
use battle_healer_common::metrics::{AggregatedHealth, ComponentHealth, CycleMetrics, HealthLevel};
use battle_healer_common::types::{
    DecisionLogEntry, DegradedResponse, HealingAction, HealingState, Observation, RegionHealth,
    RequestState, TransportError,
};
use battle_healer_planner::Planner;
use battle_healer_region::RegionRegistry;
use battle_healer_transport::{RequestSpec, Transport, TransportCallConfig, TokenRefresher};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn provide(&self) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct DegradationParams {
    pub cache_key: Option<String>,
    pub enable_stale_cache: Option<bool>,
    pub stale_ttl_ms: Option<i64>,
    pub enable_mock: Option<bool>,
    pub mock_schema: Option<serde_json::Value>,
    pub mock_example: Option<serde_json::Value>,
}

pub struct RunParams {
    pub url: String,
    pub request: RequestState,
    pub regions: Option<Vec<String>>,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub max_cycles: Option<u32>,
    pub token_provider: Arc<dyn TokenProvider>,
    pub degradation: Option<DegradationParams>,
    pub token_recovery_handler: Option<Arc<dyn TokenRefresher>>,
    pub cancellation: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
pub struct HealingAgentResult {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub degraded: DegradedResponse<serde_json::Value>,
    pub final_error: Option<TransportError>,
    pub health: AggregatedHealth,
    pub metrics: CycleMetrics,
    pub state: HealingState,
}

/// Per-region health snapshot built from the state accumulated over a run,
/// suitable for exposing to a dashboard or scraping into a metrics backend.
fn aggregate_health(state: &HealingState) -> AggregatedHealth {
    let mut components = HashMap::new();
    for (region_id, health) in &state.region_health {
        let last_status = state
            .attempts
            .iter()
            .rev()
            .find(|o| o.meta.region.as_deref() == Some(region_id.as_str()))
            .and_then(|o| o.error.status);
        components.insert(
            region_id.clone(),
            ComponentHealth { component_id: region_id.clone(), level: HealthLevel::from(*health), last_status },
        );
    }
    AggregatedHealth { components }
}

fn cycle_metrics(state: &HealingState) -> CycleMetrics {
    let region_switches =
        state.interventions.iter().filter(|i| i.action == HealingAction::SwitchRegion).count() as u32;
    CycleMetrics {
        cycles_used: state.cycles_used,
        repair_attempts: state.repair_attempts,
        region_switches,
        queued: state.queued,
    }
}

pub struct Supervisor {
    pub transport: Transport,
    pub transport_config: TransportConfig,
    pub planner: Arc<dyn Planner>,
    pub toolkit: Toolkit,
    pub region_registry: Arc<RegionRegistry>,
    pub response_cache: Arc<ResponseCache>,
    pub mock_client: Arc<MockClient>,
    pub log_client: Arc<LogClient>,
    pub degradation_config: DegradationConfig,
}

impl Supervisor {
    pub async fn run(&self, params: RunParams) -> HealingAgentResult {
        let max_cycles = params.max_cycles.unwrap_or(self.degradation_config_max_cycles());
        let regions = params
            .regions
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.region_registry.root_children());
        let regions = if regions.is_empty() { vec![String::new()] } else { regions };

        let request_id = params.request_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let correlation_id = params.correlation_id.clone().unwrap_or_else(|| request_id.clone());

        let mut state =
            HealingState::new(request_id, correlation_id, params.url.clone(), params.request.clone(), regions, max_cycles);

        match params.token_provider.provide().await {
            Ok(token) => state.token = Some(token),
            Err(err) => tracing::warn!("initial token fetch failed: {err}"),
        }

        let degradation = params.degradation.clone().unwrap_or_default();
        let cache_key = degradation
            .cache_key
            .clone()
            .unwrap_or_else(|| format!("{}::{}", params.url, state.current_region_id().cloned().unwrap_or_default()));

        while state.has_cycles_remaining() {
            if is_cancelled(&params.cancellation) {
                tracing::info!("healing run cancelled, entering degradation pipeline");
                break;
            }

            let region_id = state.current_region_id().cloned().unwrap_or_default();
            let region_endpoint = self
                .region_registry
                .find_by_id(&region_id)
                .map(|node| node.endpoint.clone())
                .unwrap_or_else(|| region_id.clone());

            let mut headers = state.request.headers.clone();
            if let Some(token) = &state.token {
                headers.insert("Authorization".to_string(), battle_healer_transport::token::format_bearer(token));
            }

            let request_spec = RequestSpec { method: parse_method(&state.request.method), headers, body: state.request.body.clone() };

            let call_config = TransportCallConfig {
                max_retries: 0,
                regions: vec![region_endpoint],
                retry_status_codes: self.transport_config.retry_status_codes.clone(),
                backoff_base_ms: self.transport_config.backoff_base_ms,
                backoff_max_ms: self.transport_config.backoff_max_ms,
                jitter_ratio: self.transport_config.jitter_ratio,
                retry_budget: None,
                correlation_id: Some(state.correlation_id.clone()),
            };

            let token_refresher = params.token_recovery_handler.as_deref();
            let result = self.transport.send(&state.url, request_spec, call_config, token_refresher).await;

            if result.is_success() {
                let mut data = result.data.clone();
                if let (Some(hints), Some(payload)) = (&state.schema_hints, &data) {
                    data = Some(schema::apply(hints, payload));
                }
                if let Some(payload) = &data {
                    self.response_cache.remember(&cache_key, payload.clone());
                }
                state.region_health.insert(region_id, RegionHealth::Healthy);
                tracing::info!(cycles_used = state.cycles_used, "healing run succeeded");
                let health = aggregate_health(&state);
                let metrics = cycle_metrics(&state);
                return HealingAgentResult {
                    success: true,
                    data,
                    degraded: DegradedResponse::none(),
                    final_error: None,
                    health,
                    metrics,
                    state,
                };
            }

            let error = result.error.clone().expect("transport failure carries a terminal error");
            let observation = Observation {
                cycle: state.cycles_used,
                meta: result.meta.clone(),
                error: error.clone(),
                timestamp: chrono::Utc::now(),
                trigger_hints: error.body.clone(),
            };
            state.attempts.push(observation.clone());
            state.cycles_used += 1;
            state.region_history.push(region_id.clone());

            match error.status {
                Some(410) => {
                    state.region_health.insert(region_id, RegionHealth::Deprecated);
                }
                Some(503) | Some(429) => {
                    state.region_health.insert(region_id, RegionHealth::Unhealthy);
                }
                _ => {}
            }

            let decision = self.planner.plan(&state, &observation).await;
            let log_entry = DecisionLogEntry {
                cycle: observation.cycle,
                action: decision.action,
                reason: decision.reason.clone(),
                params: decision.params.clone(),
            };
            self.log_client
                .log(
                    "decision",
                    serde_json::json!({
                        "cycle": log_entry.cycle,
                        "action": log_entry.action,
                        "reason": log_entry.reason,
                        "correlation_id": state.correlation_id,
                    }),
                )
                .await;
            state.decision_log.push(log_entry);

            let action = decision.action;
            let intervention = self.toolkit.execute(decision, &mut state).await;
            state.interventions.push(intervention);

            match action {
                HealingAction::UseMock => {
                    tracing::info!("healing run terminated via use_mock");
                    let health = aggregate_health(&state);
                    let metrics = cycle_metrics(&state);
                    return HealingAgentResult {
                        success: true,
                        data: state.degraded.data.clone(),
                        degraded: state.degraded.clone(),
                        final_error: None,
                        health,
                        metrics,
                        state,
                    };
                }
                HealingAction::QueueRecovery | HealingAction::Abort => break,
                _ => {}
            }
        }

        self.run_degradation_pipeline(state, &cache_key, &degradation).await
    }

    fn degradation_config_max_cycles(&self) -> u32 {
        6
    }

    async fn run_degradation_pipeline(
        &self,
        state: HealingState,
        cache_key: &str,
        degradation: &DegradationParams,
    ) -> HealingAgentResult {
        let final_error = state.attempts.last().map(|o| o.error.clone());
        let enable_stale_cache = degradation.enable_stale_cache.unwrap_or(self.degradation_config.enable_stale_cache);
        let enable_mock = degradation.enable_mock.unwrap_or(self.degradation_config.enable_mock);
        let stale_ttl_ms = degradation.stale_ttl_ms.unwrap_or(self.degradation_config.stale_ttl_ms as i64);
        let health = aggregate_health(&state);
        let metrics = cycle_metrics(&state);

        if enable_stale_cache {
            if let Some(cached) = self.response_cache.recall(cache_key, stale_ttl_ms) {
                let degraded = DegradedResponse {
                    data: Some(cached.clone()),
                    degradation: battle_healer_common::types::Degradation::StaleCache,
                    reason: Some("serving stale cached response".to_string()),
                    source: Some(battle_healer_common::types::DegradationSource::Cache),
                    original_error: final_error.clone(),
                };
                tracing::warn!("degradation pipeline: serving stale cache");
                return HealingAgentResult {
                    success: true,
                    data: Some(cached),
                    degraded,
                    final_error: None,
                    health,
                    metrics,
                    state,
                };
            }
        }

        if enable_mock {
            let request = crate::collaborators::MockRequest {
                schema_hint: state.schema_hints.as_ref().and_then(|h| serde_json::to_value(h).ok()),
                example_response: degradation.mock_example.clone(),
                cached_payload: state.cached_response.clone(),
                provider: None,
                endpoint: None,
                reason: Some("degradation pipeline exhausted retries".to_string()),
                error: final_error.as_ref().and_then(|e| serde_json::to_value(e).ok()),
                metadata: None,
            };
            match self.mock_client.mock_response(request).await {
                Ok(degraded) => {
                    tracing::warn!("degradation pipeline: serving synthetic mock");
                    return HealingAgentResult {
                        success: true,
                        data: degraded.data.clone(),
                        degraded,
                        final_error: None,
                        health,
                        metrics,
                        state,
                    };
                }
                Err(err) => {
                    tracing::warn!("degradation pipeline: mock fallback failed: {err}");
                }
            }
        }

        HealingAgentResult { success: false, data: None, degraded: DegradedResponse::none(), final_error, health, metrics, state }
    }
}

fn is_cancelled(token: &Option<CancellationToken>) -> bool {
    token.as_ref().map(|t| t.is_cancelled()).unwrap_or(false)
}

fn parse_method(method: &str) -> reqwest::Method {
    reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::POST)
}
