//! Ties the response cache, schema adapter, backend collaborators and
//! toolkit into the outer healing cycle loop.

pub mod cache;
pub mod collaborators;
pub mod schema;
pub mod supervisor;
pub mod toolkit;

pub use cache::ResponseCache;
pub use collaborators::{CredentialClient, LogClient, MockClient, QueueClient};
pub use supervisor::{DegradationParams, HealingAgentResult, RunParams, Supervisor, TokenProvider};
pub use toolkit::{RepairOutcome, RepairStrategy, Toolkit, TransactionRepairStrategy};
