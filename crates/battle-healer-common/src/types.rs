//! Core data-model types shared by transport, planner and supervisor crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Identifies a region node, stable across a process lifetime.
pub type RegionId = String;

/// Health status of a region, tagged by the Supervisor based on observed responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionHealth {
    Healthy,
    Unhealthy,
    Deprecated,
}

impl Default for RegionHealth {
    fn default() -> Self {
        RegionHealth::Healthy
    }
}

/// A fix action recorded against an attempt or a transport result.
///
/// Modeled as a string newtype rather than a closed enum: `retry_status_<N>` and
/// `fallback_region_<id>` carry dynamic suffixes that don't fit a fixed variant set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FixAction(pub String);

impl FixAction {
    pub fn retry_status(status: u16) -> Self {
        FixAction(format!("retry_status_{status}"))
    }

    pub fn fallback_region(region_id: &str) -> Self {
        FixAction(format!("fallback_region_{region_id}"))
    }

    pub fn network_error() -> Self {
        FixAction("network_error".to_string())
    }

    pub fn refresh_token() -> Self {
        FixAction("refresh_token".to_string())
    }

    pub fn rotate_token() -> Self {
        FixAction("rotate_token".to_string())
    }

    pub fn retry_budget_exhausted() -> Self {
        FixAction("retry_budget_exhausted".to_string())
    }
}

impl std::fmt::Display for FixAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One Transport attempt, appended once per send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLog {
    pub attempt_number: u32,
    pub region_id: RegionId,
    pub url: String,
    pub status: Option<u16>,
    pub error_message: Option<String>,
    pub fix_actions: Vec<FixAction>,
    pub correlation_id: String,
}

/// Telemetry accumulated across every attempt of a single Transport call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransportMeta {
    pub attempts: Vec<AttemptLog>,
    pub retries: u32,
    pub region: Option<RegionId>,
    pub regions_tried: Vec<RegionId>,
    pub fix_actions: Vec<FixAction>,
    pub correlation_id: String,
}

impl TransportMeta {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        TransportMeta {
            correlation_id: correlation_id.into(),
            ..Default::default()
        }
    }

    /// Folds a fix action into the deduplicated set exposed on the meta.
    pub fn record_fix_action(&mut self, action: FixAction) {
        if !self.fix_actions.contains(&action) {
            self.fix_actions.push(action);
        }
    }
}

/// A structured terminal error surfaced by the Transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: String,
    pub body: Option<serde_json::Value>,
}

/// Outcome of a single logical Transport call (one or more attempts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportResult<T> {
    pub data: Option<T>,
    pub meta: TransportMeta,
    pub error: Option<TransportError>,
}

impl<T> TransportResult<T> {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A single failed Transport call, fed to the Planner as context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub cycle: u32,
    pub meta: TransportMeta,
    pub error: TransportError,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub trigger_hints: Option<serde_json::Value>,
}

/// Healing actions the Planner can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingAction {
    Retry,
    RefreshToken,
    SwitchRegion,
    RepairPayload,
    RewriteRequest,
    AdaptSchema,
    InferSchema,
    UseMock,
    QueueRecovery,
    Abort,
}

/// Action-specific payload for a `HealingDecision`, replacing a loosely-typed params map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionParams {
    RepairPayload {},
    RewriteRequest {
        body: Option<serde_json::Value>,
        headers: Option<HashMap<String, String>>,
        notes: Option<String>,
    },
    SwitchRegion {},
    AdaptSchema {
        field_map: Option<HashMap<String, String>>,
        defaults: Option<HashMap<String, serde_json::Value>>,
    },
    UseMock {
        reason: Option<String>,
        endpoint: Option<String>,
        provider: Option<String>,
    },
    QueueRecovery {
        endpoint: Option<String>,
        provider: Option<String>,
        delay_seconds: Option<u64>,
    },
    Abort {
        reason: Option<String>,
    },
    Retry {
        reason: Option<String>,
    },
}

/// A decision produced by the Planner for the current cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingDecision {
    pub action: HealingAction,
    pub reason: String,
    pub params: Option<DecisionParams>,
}

/// Record of one Toolkit execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub cycle: u32,
    pub action: HealingAction,
    pub reason: String,
    pub details: Option<String>,
}

/// Field-map and default-value hints driving the SchemaAdapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaHints {
    pub field_map: Option<HashMap<String, String>>,
    pub defaults: Option<HashMap<String, serde_json::Value>>,
}

/// Degradation level attached to a response that did not come from a clean success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Degradation {
    None,
    StaleCache,
    Mocked,
    Partial,
}

impl Default for Degradation {
    fn default() -> Self {
        Degradation::None
    }
}

/// Provenance of a degraded response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DegradationSource {
    Cache,
    LlmMock,
    FallbackEndpoint,
}

/// A response that may have been served from cache, a mock, or only partially.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradedResponse<T> {
    pub data: Option<T>,
    pub degradation: Degradation,
    pub reason: Option<String>,
    pub source: Option<DegradationSource>,
    pub original_error: Option<TransportError>,
}

impl<T> DegradedResponse<T> {
    pub fn none() -> Self {
        DegradedResponse {
            data: None,
            degradation: Degradation::None,
            reason: None,
            source: None,
            original_error: None,
        }
    }
}

/// The pending request the Supervisor is driving across cycles. Mutated by
/// the Toolkit in place (payload repair, schema-driven rewrite, token
/// injection).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
}

impl RequestState {
    pub fn new(method: impl Into<String>) -> Self {
        RequestState {
            method: method.into(),
            headers: HashMap::new(),
            body: None,
        }
    }
}

/// One entry in `HealingState.decision_log`, a best-effort audit trail of
/// every Planner decision for a given cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub cycle: u32,
    pub action: HealingAction,
    pub reason: String,
    pub params: Option<DecisionParams>,
}

/// The mutable record threaded through one Supervisor invocation. Created
/// at entry, mutated only by the Supervisor and the Toolkit, and returned
/// embedded in the final result for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingState {
    pub request_id: String,
    pub correlation_id: String,
    pub url: String,
    pub request: RequestState,
    pub regions: Vec<RegionId>,
    pub region_index: usize,
    pub region_history: Vec<RegionId>,
    pub region_health: HashMap<RegionId, RegionHealth>,
    pub token: Option<String>,
    pub repair_attempts: u32,
    pub cached_response: Option<serde_json::Value>,
    pub schema_hints: Option<SchemaHints>,
    pub attempts: Vec<Observation>,
    pub interventions: Vec<Intervention>,
    pub decision_log: Vec<DecisionLogEntry>,
    pub cycles_used: u32,
    pub max_cycles: u32,
    pub queued: bool,
    pub degraded: DegradedResponse<serde_json::Value>,
}

impl HealingState {
    pub fn new(
        request_id: impl Into<String>,
        correlation_id: impl Into<String>,
        url: impl Into<String>,
        request: RequestState,
        regions: Vec<RegionId>,
        max_cycles: u32,
    ) -> Self {
        HealingState {
            request_id: request_id.into(),
            correlation_id: correlation_id.into(),
            url: url.into(),
            request,
            regions,
            region_index: 0,
            region_history: Vec::new(),
            region_health: HashMap::new(),
            token: None,
            repair_attempts: 0,
            cached_response: None,
            schema_hints: None,
            attempts: Vec::new(),
            interventions: Vec::new(),
            decision_log: Vec::new(),
            cycles_used: 0,
            max_cycles,
            queued: false,
            degraded: DegradedResponse::none(),
        }
    }

    /// The id of the region currently selected by `region_index`.
    pub fn current_region_id(&self) -> Option<&RegionId> {
        self.regions.get(self.region_index)
    }

    /// Whether the loop should keep iterating.
    pub fn has_cycles_remaining(&self) -> bool {
        self.cycles_used < self.max_cycles
    }
}
