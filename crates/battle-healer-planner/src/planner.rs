//! The `Planner` contract: a pure function from current state and the last
//! failure observation to a `HealingDecision`.

use async_trait::async_trait;
use battle_healer_common::types::{HealingDecision, HealingState, Observation};

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, state: &HealingState, observation: &Observation) -> HealingDecision;
}
