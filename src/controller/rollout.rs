pub mod apply;
pub mod reconcile;
pub mod replicaset;
pub mod store;
pub mod validation;

// Re-export everything so external API is unchanged
pub use apply::*;
pub use reconcile::*;
pub use replicaset::*;
pub use store::*;
pub use validation::*;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Tests can use unwrap/expect for brevity
#[path = "rollout_test.rs"]
mod tests;
