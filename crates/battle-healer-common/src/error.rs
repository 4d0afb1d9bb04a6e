//! Error types and result handling shared across the battle-healer crates

use thiserror::Error;

/// Result type alias used across battle-healer components
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for battle-healer operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Planner error: {0}")]
    Planner(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl Error {
    /// Whether the low-level transport should attempt a retry for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Collaborator(_))
    }

    /// Coarse category used for logging and metrics grouping.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "configuration",
            Error::Network(_) => "network",
            Error::Collaborator(_) => "collaborator",
            Error::Planner(_) => "planner",
            Error::InvalidRequest(_) => "request",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
            Error::Generic(_) => "generic",
        }
    }
}
