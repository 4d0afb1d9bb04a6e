//! HTTP clients for the out-of-scope backend collaborators: credential
//! issuance, mock degradation, recovery queueing and best-effort logging.

use battle_healer_common::error::{Error, Result};
use battle_healer_common::types::{Degradation, DegradationSource, DegradedResponse, TransportError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .user_agent("battle-healer-supervisor")
        .build()
        .expect("failed to build collaborator http client")
}

/// `/generate-api-key` and `/refresh-token`.
pub struct CredentialClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateApiKeyRequest<'a> {
    user_id: &'a str,
}

#[derive(Deserialize)]
struct GenerateApiKeyResponse {
    token: String,
}

#[derive(Serialize)]
struct RefreshTokenRequest {
    previous_token: Option<String>,
    failure_status: Option<u16>,
    attempt: Option<u32>,
    requested_by: Option<String>,
}

#[derive(Deserialize)]
struct RefreshTokenResponse {
    token: String,
}

impl CredentialClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        CredentialClient { client: build_client(), base_url: base_url.into() }
    }

    pub async fn generate_api_key(&self, user_id: &str) -> Result<String> {
        let url = format!("{}/generate-api-key", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&GenerateApiKeyRequest { user_id })
            .send()
            .await
            .map_err(|e| Error::Collaborator(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Collaborator(format!("generate-api-key failed: {body}")));
        }

        let parsed: GenerateApiKeyResponse = response.json().await.map_err(|e| Error::Collaborator(e.to_string()))?;
        Ok(parsed.token)
    }

    pub async fn refresh_token(
        &self,
        previous_token: Option<String>,
        failure_status: Option<u16>,
        attempt: Option<u32>,
    ) -> Result<String> {
        let url = format!("{}/refresh-token", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&RefreshTokenRequest { previous_token, failure_status, attempt, requested_by: None })
            .send()
            .await
            .map_err(|e| Error::Collaborator(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Collaborator(format!("refresh-token failed: {body}")));
        }

        let parsed: RefreshTokenResponse = response.json().await.map_err(|e| Error::Collaborator(e.to_string()))?;
        Ok(parsed.token)
    }
}

/// `/mock-response`.
pub struct MockClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize, Default)]
pub struct MockRequest {
    pub schema_hint: Option<serde_json::Value>,
    pub example_response: Option<serde_json::Value>,
    pub cached_payload: Option<serde_json::Value>,
    pub provider: Option<String>,
    pub endpoint: Option<String>,
    pub reason: Option<String>,
    pub error: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct MockResponseBody {
    #[serde(alias = "payload")]
    mock: Option<serde_json::Value>,
    degradation: Option<String>,
    reason: Option<String>,
    source: Option<String>,
    original_error: Option<TransportError>,
}

impl MockClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        MockClient { client: build_client(), base_url: base_url.into() }
    }

    pub async fn mock_response(&self, request: MockRequest) -> Result<DegradedResponse<serde_json::Value>> {
        let url = format!("{}/mock-response", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Collaborator(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Collaborator(format!("mock-response failed: {body}")));
        }

        let parsed: MockResponseBody = response.json().await.map_err(|e| Error::Collaborator(e.to_string()))?;

        let degradation = match parsed.degradation.as_deref() {
            Some("stale-cache") => Degradation::StaleCache,
            Some("partial") => Degradation::Partial,
            _ => Degradation::Mocked,
        };
        let source = match parsed.source.as_deref() {
            Some("cache") => Some(DegradationSource::Cache),
            Some("fallback-endpoint") => Some(DegradationSource::FallbackEndpoint),
            _ => Some(DegradationSource::LlmMock),
        };

        Ok(DegradedResponse {
            data: parsed.mock,
            degradation,
            reason: parsed.reason,
            source,
            original_error: parsed.original_error,
        })
    }
}

/// `/queue-failed`.
pub struct QueueClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
pub struct QueueEnvelope {
    pub request_id: String,
    pub correlation_id: String,
    pub endpoint: String,
    pub provider: String,
    pub region: String,
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub error_status: Option<u16>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
}

impl QueueClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        QueueClient { client: build_client(), base_url: base_url.into() }
    }

    pub async fn queue_failed(&self, mut envelope: QueueEnvelope) -> Result<()> {
        sanitize_headers(&mut envelope.headers);
        let url = format!("{}/queue-failed", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| Error::Collaborator(e.to_string()))?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Collaborator(format!("queue-failed failed: {body}")));
        }
        Ok(())
    }
}

/// `/log`. Failures are always swallowed, never propagated.
pub struct LogClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct LogRequest<'a> {
    event: &'a str,
    metadata: serde_json::Value,
}

impl LogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        LogClient { client: build_client(), base_url: base_url.into() }
    }

    pub async fn log(&self, event: &str, metadata: serde_json::Value) {
        let url = format!("{}/log", self.base_url.trim_end_matches('/'));
        if let Err(err) = self.client.post(&url).json(&LogRequest { event, metadata }).send().await {
            tracing::warn!("log collaborator unreachable: {err}");
        }
    }
}

/// Strips authorization/cookie headers before an envelope leaves the process.
pub fn sanitize_headers(headers: &mut HashMap<String, String>) {
    headers.retain(|k, _| {
        let lower = k.to_ascii_lowercase();
        lower != "authorization" && lower != "proxy-authorization" && lower != "cookie"
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn refresh_token_parses_token_from_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/refresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"token": "tok-B"})))
            .mount(&server)
            .await;

        let client = CredentialClient::new(server.uri());
        let token = client.refresh_token(Some("tok-A".to_string()), Some(401), Some(0)).await.unwrap();
        assert_eq!(token, "tok-B");
    }

    #[tokio::test]
    async fn mock_response_defaults_source_to_llm_mock() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mock-response"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "mock": {"amount": 0},
                "degradation": "mocked"
            })))
            .mount(&server)
            .await;

        let client = MockClient::new(server.uri());
        let degraded = client.mock_response(MockRequest::default()).await.unwrap();
        assert_eq!(degraded.degradation, Degradation::Mocked);
        assert_eq!(degraded.source, Some(DegradationSource::LlmMock));
        assert_eq!(degraded.data, Some(serde_json::json!({"amount": 0})));
    }

    #[tokio::test]
    async fn queue_failed_strips_sensitive_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/queue-failed"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = QueueClient::new(server.uri());
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer secret".to_string());
        headers.insert("Cookie".to_string(), "session=abc".to_string());
        headers.insert("X-Trace-Id".to_string(), "trace-1".to_string());

        let envelope = QueueEnvelope {
            request_id: "req-1".to_string(),
            correlation_id: "corr-1".to_string(),
            endpoint: "aws-us-east-1".to_string(),
            provider: String::new(),
            region: "aws-us-east-1".to_string(),
            method: "POST".to_string(),
            url: "/external-api".to_string(),
            headers,
            body: None,
            error_type: None,
            error_message: None,
            error_status: Some(503),
            timestamp: chrono::Utc::now(),
            retry_count: 2,
        };

        assert!(client.queue_failed(envelope).await.is_ok());
    }

    #[test]
    fn sanitize_headers_removes_auth_and_cookie() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "x".to_string());
        headers.insert("Proxy-Authorization".to_string(), "x".to_string());
        headers.insert("Cookie".to_string(), "x".to_string());
        headers.insert("X-Keep".to_string(), "x".to_string());
        sanitize_headers(&mut headers);
        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key("X-Keep"));
    }

    #[tokio::test]
    async fn log_swallows_failures() {
        let client = LogClient::new("http://127.0.0.1:0");
        client.log("noop", serde_json::json!({})).await;
    }
}
