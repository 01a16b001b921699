//! Rollout strategies
//!
//! Strategies are pure planners: they read one snapshot of the cluster and return the
//! ordered writes that move it toward the desired state. Applying those writes is the
//! reconciler's job (see `controller::rollout::apply`).
//!
//! - BlueGreen: active/preview Services switched between full-size ReplicaSets

pub mod blue_green;

use thiserror::Error;

/// Errors specific to strategy planning
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StrategyError {
    fn from(err: serde_json::Error) -> Self {
        StrategyError::Serialization(err.to_string())
    }
}
