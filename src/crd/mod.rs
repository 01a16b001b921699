//! Rollout custom resource definition

pub mod rollout;
