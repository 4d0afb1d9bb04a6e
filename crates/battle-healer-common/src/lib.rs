//! Shared types, configuration, error handling and observability for the
//! battle-healer self-healing HTTP client.

pub mod config;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use observability::init_tracing;
