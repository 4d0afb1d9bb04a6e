//! One-shot token recovery, invoked by the Transport at most once per call
//! on a 401/403/429 response.

use async_trait::async_trait;
use battle_healer_common::error::Result;

/// Context handed to a `TokenRefresher` describing the failure that
/// triggered recovery.
#[derive(Debug, Clone)]
pub struct TokenRecoveryContext {
    pub status: u16,
    pub attempt: u32,
    pub region: String,
    pub previous_token: Option<String>,
}

/// Pluggable token recovery strategy. Returning `Ok(None)` is treated the
/// same as a refresher error: recovery failed and the Transport surfaces a
/// terminal error.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, ctx: TokenRecoveryContext) -> Result<Option<String>>;
}

/// Formats a token as an `Authorization` header value, avoiding a doubled
/// `Bearer` prefix if the caller already supplied one.
pub fn format_bearer(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_bearer_adds_prefix_once() {
        assert_eq!(format_bearer("tok-A"), "Bearer tok-A");
        assert_eq!(format_bearer("Bearer tok-A"), "Bearer tok-A");
    }
}
