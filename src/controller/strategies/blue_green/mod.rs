//! Blue-Green reconciliation
//!
//! Maintains two Services over full-size ReplicaSets. The preview Service follows the
//! newest pod template immediately; the active Service is switched only when the new
//! ReplicaSet is fully available and preview verification (if any) is done. Superseded
//! ReplicaSets are retired in two phases and pruned past the revision history limit.
//!
//! Everything here is pure: [`plan`] reads a [`Snapshot`] and returns the writes that
//! converge it, in the order they must be applied.

pub mod classify;
pub mod gate;
pub mod patch;
pub mod promotion;
pub mod scale_down;
pub mod selector;
pub mod status;

pub use classify::{classify, replicaset_hash, Classified};
pub use gate::must_withhold_promotion;
pub use promotion::{decide_promotion, PromotionDecision};
pub use scale_down::{plan_scale_down, ScaleDownPlan, ScaleOp};
pub use selector::{reconcile_selector, service_hash};
pub use status::{invalid_spec_status, set_condition, status_patch, synthesize_status};

use super::StrategyError;
use crate::controller::rollout::validate_rollout;
use crate::crd::rollout::{
    Rollout, DEFAULT_REVISION_HISTORY_LIMIT, DEFAULT_SCALE_DOWN_DELAY_SECONDS,
};
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// One observation of everything the blue-green decision depends on
#[derive(Debug, Clone)]
pub struct Snapshot<'a> {
    /// The Rollout with its persisted status
    pub rollout: &'a Rollout,
    /// ReplicaSets owned by the Rollout
    pub replica_sets: &'a [ReplicaSet],
    /// Active Service, `None` if unconfigured or not found
    pub active_service: Option<&'a Service>,
    /// Preview Service, `None` if unconfigured or not found
    pub preview_service: Option<&'a Service>,
    /// Fingerprint of the current pod template
    pub pod_hash: &'a str,
    pub now: DateTime<Utc>,
}

/// Which blue-green Service a write targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    Active,
    Preview,
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRole::Active => write!(f, "active"),
            ServiceRole::Preview => write!(f, "preview"),
        }
    }
}

/// A single write the caller must apply
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Merge patch on a Service's `spec.selector`
    PatchServiceSelector {
        role: ServiceRole,
        service: String,
        target: String,
        patch: Value,
    },
    /// Write against a superseded ReplicaSet
    ScaleDown(ScaleOp),
    /// Merge patch on the Rollout status subresource
    PatchRolloutStatus { patch: Value },
}

impl Operation {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::PatchServiceSelector { .. } => "patch_service_selector",
            Operation::ScaleDown(ScaleOp::MarkIntent { .. }) => "mark_scale_down",
            Operation::ScaleDown(ScaleOp::ScaleToZero { .. }) => "scale_to_zero",
            Operation::ScaleDown(ScaleOp::Remove { .. }) => "delete_replica_set",
            Operation::PatchRolloutStatus { .. } => "patch_rollout_status",
        }
    }
}

/// Non-fatal findings, surfaced as Warning events
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    #[error("{role} service '{name}' not found")]
    ServiceNotFound { role: ServiceRole, name: String },

    #[error("ReplicaSet for pod template hash {pod_hash} not found")]
    NewReplicaSetMissing { pod_hash: String },

    #[error("invalid rollout configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

impl Diagnostic {
    /// CamelCase reason for Kubernetes events
    pub fn reason(&self) -> &'static str {
        match self {
            Diagnostic::ServiceNotFound { .. } => "ServiceNotFound",
            Diagnostic::NewReplicaSetMissing { .. } => "NewReplicaSetMissing",
            Diagnostic::InvalidConfiguration { .. } => "InvalidSpec",
        }
    }
}

/// Ordered writes plus what the caller needs to report and requeue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub operations: Vec<Operation>,
    pub diagnostics: Vec<Diagnostic>,
    /// `None` when the configuration was rejected before deciding
    pub promotion: Option<PromotionDecision>,
    /// Earliest pending scale-down deadline, relative to the snapshot time
    pub requeue_after: Option<std::time::Duration>,
}

impl Plan {
    /// Validation failure message, if the rollout was rejected
    pub fn invalid_reason(&self) -> Option<&str> {
        self.diagnostics.iter().find_map(|d| match d {
            Diagnostic::InvalidConfiguration { reason } => Some(reason.as_str()),
            _ => None,
        })
    }
}

/// Resolve a configured Service, reporting it if it is missing
fn resolve<'a>(
    role: ServiceRole,
    name: &str,
    service: Option<&'a Service>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<&'a Service> {
    if name.is_empty() {
        return None;
    }
    if service.is_none() {
        diagnostics.push(Diagnostic::ServiceNotFound {
            role,
            name: name.to_string(),
        });
    }
    service
}

/// Compute the writes that converge one blue-green rollout
///
/// Order of the returned operations: preview selector, active selector, scale-down
/// writes, status. Re-planning a snapshot with all operations applied yields none.
///
/// # Errors
/// Only serialization failures; missing objects are reported as diagnostics.
pub fn plan(snapshot: &Snapshot<'_>) -> Result<Plan, StrategyError> {
    let rollout = snapshot.rollout;
    let name = rollout.name_any();
    let mut plan = Plan::default();

    let blue_green = match validate_rollout(rollout) {
        Ok(()) => rollout.spec.strategy.blue_green.clone().unwrap_or_default(),
        Err(reason) => {
            debug!(rollout = ?name, reason = %reason, "Rollout configuration rejected");
            let status = invalid_spec_status(rollout, &reason, snapshot.now);
            if let Some(patch) = status_patch(rollout, &status)? {
                plan.operations.push(Operation::PatchRolloutStatus { patch });
            }
            plan.diagnostics
                .push(Diagnostic::InvalidConfiguration { reason });
            return Ok(plan);
        }
    };

    let classified = classify(snapshot.replica_sets, snapshot.pod_hash);
    if classified.new.is_none() {
        plan.diagnostics.push(Diagnostic::NewReplicaSetMissing {
            pod_hash: snapshot.pod_hash.to_string(),
        });
    }

    let active = resolve(
        ServiceRole::Active,
        &blue_green.active_service,
        snapshot.active_service,
        &mut plan.diagnostics,
    );
    let preview = resolve(
        ServiceRole::Preview,
        &blue_green.preview_service,
        snapshot.preview_service,
        &mut plan.diagnostics,
    );

    // Preview follows the new ReplicaSet regardless of verification state
    let mut preview_hash = preview.and_then(service_hash);
    if let Some(new_hash) = classified.new.and_then(replicaset_hash) {
        if let Some(patch) = reconcile_selector(&blue_green.preview_service, preview, new_hash) {
            plan.operations.push(Operation::PatchServiceSelector {
                role: ServiceRole::Preview,
                service: blue_green.preview_service.clone(),
                target: new_hash.to_string(),
                patch,
            });
        }
        if preview.is_some() {
            preview_hash = Some(new_hash);
        }
    }

    let withheld = must_withhold_promotion(rollout, active);
    let decision = decide_promotion(classified.new, active, withheld);
    debug!(
        rollout = ?name,
        pod_hash = snapshot.pod_hash,
        withheld,
        decision = ?decision,
        "Promotion decided"
    );

    let mut active_hash = active.and_then(service_hash);
    if let PromotionDecision::Promote { target } = &decision {
        if let Some(patch) = reconcile_selector(&blue_green.active_service, active, target) {
            plan.operations.push(Operation::PatchServiceSelector {
                role: ServiceRole::Active,
                service: blue_green.active_service.clone(),
                target: target.clone(),
                patch,
            });
        }
        active_hash = Some(target.as_str());
    }

    if active.is_some() {
        let history_limit = rollout
            .spec
            .revision_history_limit
            .unwrap_or(DEFAULT_REVISION_HISTORY_LIMIT);
        let delay = Duration::seconds(i64::from(
            blue_green
                .scale_down_delay_seconds
                .unwrap_or(DEFAULT_SCALE_DOWN_DELAY_SECONDS),
        ));
        let scale_down = plan_scale_down(
            &classified.old,
            active_hash,
            history_limit,
            delay,
            snapshot.now,
        );
        plan.operations
            .extend(scale_down.ops.into_iter().map(Operation::ScaleDown));
        plan.requeue_after = scale_down.next_deadline.map(|deadline| {
            (deadline - snapshot.now)
                .to_std()
                .unwrap_or_default()
                .max(std::time::Duration::from_secs(1))
        });
    }

    let next = synthesize_status(&status::StatusInputs {
        rollout,
        pod_hash: snapshot.pod_hash,
        new: classified.new,
        replica_sets: snapshot.replica_sets,
        decision: &decision,
        active_hash,
        preview_hash,
        active_missing: !blue_green.active_service.is_empty() && active.is_none(),
        now: snapshot.now,
    });
    if let Some(patch) = status_patch(rollout, &next)? {
        plan.operations.push(Operation::PatchRolloutStatus { patch });
    }

    plan.promotion = Some(decision);
    Ok(plan)
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
#[path = "plan_test.rs"]
mod tests;
