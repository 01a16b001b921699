//! Blue-green progressive delivery controller for Kubernetes
//!
//! A `Rollout` owns full-size ReplicaSets and two Services. The preview Service follows
//! the newest pod template; the active Service is switched once the new ReplicaSet is
//! fully available. See [`controller::strategies::blue_green::plan`] for the decision
//! core and [`controller::reconcile`] for the loop that feeds and applies it.

pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
