pub mod clock;
pub mod events;
pub mod rollout;
pub mod strategies;

pub use rollout::{error_policy, reconcile, Context, ReconcileError};
