//! Executes a `HealingDecision` against `HealingState`, mutating it in
//! place and returning an `Intervention` describing what happened.

use crate::collaborators::{CredentialClient, MockClient, MockRequest, QueueClient, QueueEnvelope};
use crate::schema;
use battle_healer_common::config::RepairConfig;
use battle_healer_common::types::{DecisionParams, HealingAction, HealingDecision, HealingState, Intervention};
use battle_healer_region::{RegionRegistry, ResolveOpts};
use battle_healer_transport::RetryBudgetStore;
use std::collections::HashMap;
use std::sync::Arc;

/// What happened to the request body during a repair.
pub enum RepairOutcome {
    Patched,
    Replaced,
}

/// Injects the concrete default-field strategy for `repair_payload`,
/// keeping the Toolkit itself strategy-agnostic.
pub trait RepairStrategy: Send + Sync {
    fn ensure_fields(&self, body: &mut serde_json::Value) -> RepairOutcome;
}

/// The default strategy: ensures `transactionId` and `amount` are present,
/// mirroring the domain this client was built against.
pub struct TransactionRepairStrategy;

impl RepairStrategy for TransactionRepairStrategy {
    fn ensure_fields(&self, body: &mut serde_json::Value) -> RepairOutcome {
        let timestamp = chrono::Utc::now().timestamp_millis();

        if let Some(obj) = body.as_object_mut() {
            obj.entry("transactionId".to_string())
                .or_insert_with(|| serde_json::json!(format!("auto-{timestamp}")));
            let amount_missing = matches!(obj.get("amount"), None | Some(serde_json::Value::Null));
            if amount_missing {
                obj.insert("amount".to_string(), serde_json::json!(0));
            }
            RepairOutcome::Patched
        } else {
            *body = serde_json::json!({
                "transactionId": format!("fallback-{timestamp}"),
                "amount": 0,
            });
            RepairOutcome::Replaced
        }
    }
}

pub struct Toolkit {
    pub repair_config: RepairConfig,
    pub repair_strategy: Arc<dyn RepairStrategy>,
    pub repair_window: Arc<RetryBudgetStore>,
    pub region_registry: Arc<RegionRegistry>,
    pub credential_client: Arc<CredentialClient>,
    pub mock_client: Arc<MockClient>,
    pub queue_client: Arc<QueueClient>,
}

impl Toolkit {
    pub async fn execute(&self, decision: HealingDecision, state: &mut HealingState) -> Intervention {
        let cycle = state.cycles_used;
        match decision.action {
            HealingAction::Retry => Intervention {
                cycle,
                action: HealingAction::Retry,
                reason: decision.reason,
                details: None,
            },
            HealingAction::RefreshToken => self.refresh_token(state, decision, cycle).await,
            HealingAction::SwitchRegion => self.switch_region(state, decision, cycle),
            HealingAction::RepairPayload => self.repair_payload(state, decision, cycle),
            HealingAction::RewriteRequest => self.rewrite_request(state, decision, cycle),
            HealingAction::AdaptSchema | HealingAction::InferSchema => self.adapt_schema(state, decision, cycle),
            HealingAction::UseMock => self.use_mock(state, decision, cycle).await,
            HealingAction::QueueRecovery => self.queue_recovery(state, decision, cycle).await,
            HealingAction::Abort => {
                state.cycles_used = state.max_cycles;
                Intervention { cycle, action: HealingAction::Abort, reason: decision.reason, details: None }
            }
        }
    }

    /// Fails if the per-state repair counter or the process-wide
    /// endpoint-repair-window has been exhausted, terminating the loop.
    fn ensure_repair_allowance(&self, state: &mut HealingState, cycle: u32) -> Option<Intervention> {
        if state.repair_attempts >= self.repair_config.max_repair_attempts {
            state.cycles_used = state.max_cycles;
            return Some(Intervention {
                cycle,
                action: HealingAction::Abort,
                reason: "repair attempts exhausted for this request".to_string(),
                details: None,
            });
        }

        let key = format!("repair:{}", state.url);
        if !self.repair_window.consume(&key, self.repair_config.repair_window_limit, self.repair_config.repair_window_ms) {
            state.cycles_used = state.max_cycles;
            return Some(Intervention {
                cycle,
                action: HealingAction::Abort,
                reason: "endpoint repair window exceeded".to_string(),
                details: None,
            });
        }

        None
    }

    fn repair_payload(&self, state: &mut HealingState, decision: HealingDecision, cycle: u32) -> Intervention {
        if let Some(intervention) = self.ensure_repair_allowance(state, cycle) {
            return intervention;
        }

        let mut body = state.request.body.clone().unwrap_or(serde_json::Value::Null);
        self.repair_strategy.ensure_fields(&mut body);
        state.request.body = Some(body);
        state.repair_attempts += 1;
        state
            .request
            .headers
            .insert("X-Healer-Repair-Attempt".to_string(), state.repair_attempts.to_string());

        Intervention {
            cycle,
            action: HealingAction::RepairPayload,
            reason: decision.reason,
            details: Some(format!("repair attempt {}", state.repair_attempts)),
        }
    }

    fn rewrite_request(&self, state: &mut HealingState, decision: HealingDecision, cycle: u32) -> Intervention {
        if let Some(intervention) = self.ensure_repair_allowance(state, cycle) {
            return intervention;
        }

        let new_body = match &decision.params {
            Some(DecisionParams::RewriteRequest { body, .. }) => body.clone(),
            _ => None,
        };

        let Some(new_body) = new_body else {
            return Intervention {
                cycle,
                action: HealingAction::RewriteRequest,
                reason: "no replacement body supplied, state unchanged".to_string(),
                details: None,
            };
        };

        state.request.body = Some(new_body);
        if let Some(DecisionParams::RewriteRequest { headers: Some(headers), .. }) = &decision.params {
            for (key, value) in headers {
                state.request.headers.insert(key.clone(), value.clone());
            }
        }
        state.repair_attempts += 1;
        state
            .request
            .headers
            .insert("X-Healer-Repair-Attempt".to_string(), state.repair_attempts.to_string());

        Intervention {
            cycle,
            action: HealingAction::RewriteRequest,
            reason: decision.reason,
            details: Some(format!("repair attempt {}", state.repair_attempts)),
        }
    }

    fn switch_region(&self, state: &mut HealingState, decision: HealingDecision, cycle: u32) -> Intervention {
        let current_id = state.current_region_id().cloned().unwrap_or_default();
        match self.region_registry.resolve_next(&current_id, &state.region_health, &ResolveOpts::default()) {
            Some(node) => {
                if !state.regions.iter().any(|r| r == &node.id) {
                    state.regions.push(node.id.clone());
                }
                state.region_index = state.regions.iter().position(|r| r == &node.id).unwrap_or(state.region_index);
                Intervention {
                    cycle,
                    action: HealingAction::SwitchRegion,
                    reason: decision.reason,
                    details: Some(format!("region={}", node.id)),
                }
            }
            None => Intervention {
                cycle,
                action: HealingAction::SwitchRegion,
                reason: "No alternate region available".to_string(),
                details: None,
            },
        }
    }

    fn adapt_schema(&self, state: &mut HealingState, decision: HealingDecision, cycle: u32) -> Intervention {
        let (field_map, defaults) = match decision.params {
            Some(DecisionParams::AdaptSchema { field_map, defaults }) => (field_map, defaults),
            _ => (None, None),
        };

        let mut hints = state.schema_hints.clone().unwrap_or_default();
        if let Some(incoming) = field_map {
            hints.field_map.get_or_insert_with(HashMap::new).extend(incoming);
        }
        if let Some(incoming) = defaults {
            hints.defaults.get_or_insert_with(HashMap::new).extend(incoming);
        }
        state.schema_hints = Some(hints.clone());

        if let Some(cached) = state.cached_response.clone() {
            state.cached_response = Some(schema::apply(&hints, &cached));
        }

        Intervention { cycle, action: decision.action, reason: decision.reason, details: None }
    }

    async fn use_mock(&self, state: &mut HealingState, decision: HealingDecision, cycle: u32) -> Intervention {
        let (reason, endpoint, provider) = match &decision.params {
            Some(DecisionParams::UseMock { reason, endpoint, provider }) => {
                (reason.clone(), endpoint.clone(), provider.clone())
            }
            _ => (None, None, None),
        };

        let request = MockRequest {
            schema_hint: state.schema_hints.as_ref().and_then(|h| serde_json::to_value(h).ok()),
            example_response: None,
            cached_payload: state.cached_response.clone(),
            provider,
            endpoint,
            reason: reason.clone(),
            error: state.attempts.last().and_then(|o| serde_json::to_value(&o.error).ok()),
            metadata: None,
        };

        match self.mock_client.mock_response(request).await {
            Ok(degraded) => {
                state.cached_response = degraded.data.clone();
                state.degraded = degraded;
                Intervention { cycle, action: HealingAction::UseMock, reason: decision.reason, details: None }
            }
            Err(err) => {
                tracing::warn!("mock collaborator failed: {err}");
                Intervention {
                    cycle,
                    action: HealingAction::UseMock,
                    reason: format!("mock collaborator failed: {err}"),
                    details: None,
                }
            }
        }
    }

    async fn queue_recovery(&self, state: &mut HealingState, decision: HealingDecision, cycle: u32) -> Intervention {
        let mut headers = state.request.headers.clone();
        crate::collaborators::sanitize_headers(&mut headers);

        let region = state.current_region_id().cloned().unwrap_or_default();
        let envelope = QueueEnvelope {
            request_id: state.request_id.clone(),
            correlation_id: state.correlation_id.clone(),
            endpoint: region.clone(),
            provider: String::new(),
            region,
            method: state.request.method.clone(),
            url: state.url.clone(),
            headers,
            body: state.request.body.clone(),
            error_type: None,
            error_message: state.attempts.last().map(|o| o.error.message.clone()),
            error_status: state.attempts.last().and_then(|o| o.error.status),
            timestamp: chrono::Utc::now(),
            retry_count: state.cycles_used,
        };

        match self.queue_client.queue_failed(envelope).await {
            Ok(()) => {
                state.queued = true;
                Intervention { cycle, action: HealingAction::QueueRecovery, reason: decision.reason, details: None }
            }
            Err(err) => {
                state.cycles_used = state.max_cycles;
                Intervention {
                    cycle,
                    action: HealingAction::QueueRecovery,
                    reason: format!("queue collaborator failed: {err}"),
                    details: None,
                }
            }
        }
    }

    async fn refresh_token(&self, state: &mut HealingState, decision: HealingDecision, cycle: u32) -> Intervention {
        let failure_status = state.attempts.last().and_then(|o| o.error.status);
        match self
            .credential_client
            .refresh_token(state.token.clone(), failure_status, Some(state.cycles_used))
            .await
        {
            Ok(token) => {
                state.token = Some(token);
                Intervention { cycle, action: HealingAction::RefreshToken, reason: decision.reason, details: None }
            }
            Err(err) => {
                state.cycles_used = state.max_cycles;
                Intervention {
                    cycle,
                    action: HealingAction::RefreshToken,
                    reason: format!("token refresh failed: {err}"),
                    details: None,
                }
            }
        }
    }
}
