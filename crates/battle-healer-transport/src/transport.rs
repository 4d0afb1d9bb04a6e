//! Single logical-request attempt loop: retries, region rotation, token
//! recovery and structured per-attempt telemetry.

use crate::backoff::{compute_delay, parse_retry_after};
use crate::budget::RetryBudgetStore;
use crate::request::RequestSpec;
use crate::token::{format_bearer, TokenRecoveryContext, TokenRefresher};
use battle_healer_common::types::{AttemptLog, FixAction, TransportError, TransportMeta, TransportResult};
use std::sync::Arc;
use uuid::Uuid;

/// Budget key, limit and window for a single Transport call.
#[derive(Debug, Clone)]
pub struct RetryBudgetSpec {
    pub key: String,
    pub limit: u32,
    pub window_ms: u64,
}

/// Per-call configuration. Defaults mirror the documented spec defaults.
#[derive(Debug, Clone)]
pub struct TransportCallConfig {
    pub max_retries: u32,
    pub regions: Vec<String>,
    pub retry_status_codes: Vec<u16>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_ratio: f64,
    pub retry_budget: Option<RetryBudgetSpec>,
    pub correlation_id: Option<String>,
}

impl Default for TransportCallConfig {
    fn default() -> Self {
        let transport = battle_healer_common::config::TransportConfig::default();
        TransportCallConfig {
            max_retries: transport.max_retries,
            regions: vec![String::new()],
            retry_status_codes: transport.retry_status_codes,
            backoff_base_ms: transport.backoff_base_ms,
            backoff_max_ms: transport.backoff_max_ms,
            jitter_ratio: transport.jitter_ratio,
            retry_budget: None,
            correlation_id: None,
        }
    }
}

/// Executes a single logical request across one or more regional attempts.
pub struct Transport {
    client: reqwest::Client,
    budget_store: Arc<RetryBudgetStore>,
}

impl Transport {
    pub fn new(client: reqwest::Client, budget_store: Arc<RetryBudgetStore>) -> Self {
        Transport { client, budget_store }
    }

    pub fn with_default_client(budget_store: Arc<RetryBudgetStore>) -> Self {
        Transport::new(reqwest::Client::new(), budget_store)
    }

    pub async fn send(
        &self,
        url: &str,
        request: RequestSpec,
        config: TransportCallConfig,
        token_refresher: Option<&dyn TokenRefresher>,
    ) -> TransportResult<serde_json::Value> {
        let correlation_id = config
            .correlation_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut meta = TransportMeta::new(correlation_id.clone());
        let regions = if config.regions.is_empty() {
            vec![String::new()]
        } else {
            config.regions.clone()
        };

        let mut headers = request.headers.clone();
        let mut attempt: u32 = 0;
        let mut token_recovery_used = false;

        loop {
            let region = regions[(attempt as usize) % regions.len()].clone();
            let target = build_target_url(url, &region);

            let mut attempt_headers = headers.clone();
            attempt_headers.insert(
                "X-BattleHealer-Region".to_string(),
                if region.is_empty() { "default".to_string() } else { region.clone() },
            );
            attempt_headers.insert("X-Correlation-Id".to_string(), correlation_id.clone());

            meta.region = Some(region.clone());
            if !meta.regions_tried.contains(&region) {
                meta.regions_tried.push(region.clone());
            }

            let mut builder = self.client.request(request.method.clone(), &target);
            for (key, value) in &attempt_headers {
                builder = builder.header(key, value);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let send_result = builder.send().await;

            let response = match send_result {
                Ok(response) => response,
                Err(err) => {
                    let fix = FixAction::network_error();
                    let retryable = attempt < config.max_retries;

                    if retryable {
                        if let Some(budget) = &config.retry_budget {
                            if !self.budget_store.consume(&budget.key, budget.limit, budget.window_ms) {
                                meta.record_fix_action(FixAction::retry_budget_exhausted());
                                push_attempt(
                                    &mut meta,
                                    attempt,
                                    &region,
                                    &target,
                                    None,
                                    Some(err.to_string()),
                                    vec![fix, FixAction::retry_budget_exhausted()],
                                    &correlation_id,
                                );
                                return terminal_result(meta, None, "retry budget exhausted".to_string(), None);
                            }
                        }

                        meta.record_fix_action(fix.clone());
                        push_attempt(
                            &mut meta,
                            attempt,
                            &region,
                            &target,
                            None,
                            Some(err.to_string()),
                            vec![fix],
                            &correlation_id,
                        );

                        tracing::debug!(attempt, region = %region, "network error, retrying");
                        let delay = compute_delay(attempt, config.backoff_base_ms, config.backoff_max_ms, config.jitter_ratio);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    meta.record_fix_action(fix.clone());
                    push_attempt(
                        &mut meta,
                        attempt,
                        &region,
                        &target,
                        None,
                        Some(err.to_string()),
                        vec![fix],
                        &correlation_id,
                    );
                    return terminal_result(meta, None, err.to_string(), None);
                }
            };

            let status = response.status();

            if status.is_success() {
                let data = parse_success_body(response).await;
                push_attempt(
                    &mut meta,
                    attempt,
                    &region,
                    &target,
                    Some(status.as_u16()),
                    None,
                    vec![],
                    &correlation_id,
                );
                meta.retries = meta.attempts.len().saturating_sub(1) as u32;
                tracing::info!(attempt, region = %region, status = status.as_u16(), "transport attempt succeeded");
                return TransportResult { data, meta, error: None };
            }

            let status_code = status.as_u16();

            if let Some(refresher) = token_refresher {
                if !token_recovery_used && matches!(status_code, 401 | 403 | 429) {
                    token_recovery_used = true;
                    let ctx = TokenRecoveryContext {
                        status: status_code,
                        attempt,
                        region: region.clone(),
                        previous_token: headers.get("Authorization").cloned(),
                    };

                    match refresher.refresh(ctx).await {
                        Ok(Some(new_token)) => {
                            let formatted = format_bearer(&new_token);
                            headers.insert("Authorization".to_string(), formatted);
                            let fix = if status_code == 403 {
                                FixAction::rotate_token()
                            } else {
                                FixAction::refresh_token()
                            };
                            meta.record_fix_action(fix.clone());
                            push_attempt(
                                &mut meta,
                                attempt,
                                &region,
                                &target,
                                Some(status_code),
                                None,
                                vec![fix],
                                &correlation_id,
                            );
                            tracing::info!(attempt, status = status_code, "token recovery succeeded");
                            attempt += 1;
                            continue;
                        }
                        Ok(None) | Err(_) => {
                            let body = safe_parse_error_body(response).await;
                            push_attempt(
                                &mut meta,
                                attempt,
                                &region,
                                &target,
                                Some(status_code),
                                Some("token recovery failed".to_string()),
                                vec![],
                                &correlation_id,
                            );
                            tracing::warn!(attempt, status = status_code, "token recovery failed");
                            return terminal_result(meta, Some(status_code), "token recovery failed".to_string(), body);
                        }
                    }
                }
            }

            let retryable = config.retry_status_codes.contains(&status_code) || (500..=599).contains(&status_code);
            let mut fix_actions = Vec::new();
            if retryable {
                fix_actions.push(FixAction::retry_status(status_code));
            }
            if matches!(status_code, 503 | 410) && regions.len() > 1 {
                let next_region = &regions[(attempt as usize + 1) % regions.len()];
                fix_actions.push(FixAction::fallback_region(next_region));
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());

            if retryable && attempt < config.max_retries {
                if let Some(budget) = &config.retry_budget {
                    if !self.budget_store.consume(&budget.key, budget.limit, budget.window_ms) {
                        fix_actions.push(FixAction::retry_budget_exhausted());
                        for fa in &fix_actions {
                            meta.record_fix_action(fa.clone());
                        }
                        let body = safe_parse_error_body(response).await;
                        push_attempt(
                            &mut meta,
                            attempt,
                            &region,
                            &target,
                            Some(status_code),
                            Some("retry budget exhausted".to_string()),
                            fix_actions,
                            &correlation_id,
                        );
                        return terminal_result(meta, Some(status_code), "retry budget exhausted".to_string(), body);
                    }
                }

                for fa in &fix_actions {
                    meta.record_fix_action(fa.clone());
                }
                push_attempt(
                    &mut meta,
                    attempt,
                    &region,
                    &target,
                    Some(status_code),
                    None,
                    fix_actions,
                    &correlation_id,
                );

                let delay = retry_after
                    .as_deref()
                    .and_then(|h| parse_retry_after(h, config.backoff_max_ms))
                    .unwrap_or_else(|| compute_delay(attempt, config.backoff_base_ms, config.backoff_max_ms, config.jitter_ratio));

                tracing::debug!(attempt, status = status_code, delay_ms = delay.as_millis() as u64, "retrying after delay");
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            for fa in &fix_actions {
                meta.record_fix_action(fa.clone());
            }
            let message = format!("Request failed with status {status_code}");
            let body = safe_parse_error_body(response).await;
            push_attempt(
                &mut meta,
                attempt,
                &region,
                &target,
                Some(status_code),
                Some(message.clone()),
                fix_actions,
                &correlation_id,
            );
            tracing::warn!(attempt, status = status_code, "transport attempt terminally failed");
            return terminal_result(meta, Some(status_code), message, body);
        }
    }
}

fn build_target_url(url: &str, region: &str) -> String {
    if is_absolute_url(url) {
        return url.to_string();
    }
    if region.is_empty() {
        return url.to_string();
    }
    let trimmed_region = region.trim_end_matches('/');
    let prefixed_path = if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{url}")
    };
    format!("{trimmed_region}{prefixed_path}")
}

fn is_absolute_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

async fn parse_success_body(response: reqwest::Response) -> Option<serde_json::Value> {
    if response.status().as_u16() == 204 {
        return None;
    }
    let is_json = content_type_is_json(&response);

    if is_json {
        match response.json::<serde_json::Value>().await {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("failed to parse JSON response body: {err}");
                None
            }
        }
    } else {
        response.text().await.ok().map(serde_json::Value::String)
    }
}

async fn safe_parse_error_body(response: reqwest::Response) -> Option<serde_json::Value> {
    if content_type_is_json(&response) {
        response.json::<serde_json::Value>().await.ok()
    } else {
        response.text().await.ok().map(serde_json::Value::String)
    }
}

fn content_type_is_json(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("application/json"))
        .unwrap_or(false)
}

#[allow(clippy::too_many_arguments)]
fn push_attempt(
    meta: &mut TransportMeta,
    attempt: u32,
    region: &str,
    target: &str,
    status: Option<u16>,
    error_message: Option<String>,
    fix_actions: Vec<FixAction>,
    correlation_id: &str,
) {
    meta.attempts.push(AttemptLog {
        attempt_number: attempt,
        region_id: region.to_string(),
        url: target.to_string(),
        status,
        error_message,
        fix_actions,
        correlation_id: correlation_id.to_string(),
    });
    meta.retries = meta.attempts.len().saturating_sub(1) as u32;
}

fn terminal_result(
    meta: TransportMeta,
    status: Option<u16>,
    message: String,
    body: Option<serde_json::Value>,
) -> TransportResult<serde_json::Value> {
    TransportResult {
        data: None,
        meta,
        error: Some(TransportError { status, message, body }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestSpec;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store() -> Arc<RetryBudgetStore> {
        Arc::new(RetryBudgetStore::new())
    }

    #[tokio::test]
    async fn successful_request_returns_data_and_no_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"amount": 10})))
            .mount(&server)
            .await;

        let transport = Transport::with_default_client(store());
        let url = format!("{}/ok", server.uri());
        let result = transport
            .send(&url, RequestSpec::get(), TransportCallConfig::default(), None)
            .await;

        assert!(result.is_success());
        assert_eq!(result.data, Some(serde_json::json!({"amount": 10})));
        assert_eq!(result.meta.attempts.len(), 1);
    }

    #[tokio::test]
    async fn retries_on_503_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let transport = Transport::with_default_client(store());
        let url = format!("{}/flaky", server.uri());
        let mut config = TransportCallConfig::default();
        config.backoff_base_ms = 1;
        config.backoff_max_ms = 5;

        let result = transport.send(&url, RequestSpec::get(), config, None).await;

        assert!(result.is_success());
        assert_eq!(result.meta.attempts.len(), 2);
        assert!(result
            .meta
            .fix_actions
            .iter()
            .any(|fa| fa.0 == "retry_status_503"));
    }

    #[tokio::test]
    async fn exhausts_retries_and_returns_terminal_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transport = Transport::with_default_client(store());
        let url = format!("{}/down", server.uri());
        let mut config = TransportCallConfig::default();
        config.max_retries = 1;
        config.backoff_base_ms = 1;
        config.backoff_max_ms = 2;

        let result = transport.send(&url, RequestSpec::get(), config, None).await;

        assert!(!result.is_success());
        assert_eq!(result.meta.attempts.len(), 2);
        assert_eq!(result.error.unwrap().status, Some(500));
    }

    #[tokio::test]
    async fn retry_budget_denial_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/budgeted"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let budget_store = store();
        assert!(budget_store.consume("budget-key", 1, 60_000));

        let transport = Transport::new(reqwest::Client::new(), budget_store);
        let url = format!("{}/budgeted", server.uri());
        let mut config = TransportCallConfig::default();
        config.retry_budget = Some(RetryBudgetSpec {
            key: "budget-key".to_string(),
            limit: 1,
            window_ms: 60_000,
        });

        let result = transport.send(&url, RequestSpec::get(), config, None).await;

        assert!(!result.is_success());
        assert!(result
            .meta
            .fix_actions
            .iter()
            .any(|fa| fa.0 == "retry_budget_exhausted"));
    }

    struct FixedTokenRefresher(String);

    #[async_trait::async_trait]
    impl TokenRefresher for FixedTokenRefresher {
        async fn refresh(&self, _ctx: TokenRecoveryContext) -> battle_healer_common::error::Result<Option<String>> {
            Ok(Some(self.0.clone()))
        }
    }

    #[tokio::test]
    async fn token_recovery_retries_with_new_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let transport = Transport::with_default_client(store());
        let url = format!("{}/secure", server.uri());
        let refresher = FixedTokenRefresher("tok-B".to_string());

        let result = transport
            .send(&url, RequestSpec::get(), TransportCallConfig::default(), Some(&refresher))
            .await;

        assert!(result.is_success());
        assert!(result.meta.fix_actions.iter().any(|fa| fa.0 == "refresh_token"));
    }

    #[test]
    fn build_target_url_joins_region_and_path() {
        assert_eq!(
            build_target_url("/external-api", "https://us.example.com/"),
            "https://us.example.com/external-api"
        );
        assert_eq!(build_target_url("external-api", "https://us.example.com"), "https://us.example.com/external-api");
        assert_eq!(build_target_url("https://already.example.com/path", "https://us.example.com"), "https://already.example.com/path");
        assert_eq!(build_target_url("/external-api", ""), "/external-api");
    }
}
