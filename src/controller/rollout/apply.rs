use super::reconcile::{Context, ReconcileError};
use super::store::StoreError;
use crate::controller::events::RolloutEvent;
use crate::controller::strategies::blue_green::{Operation, ScaleOp, ServiceRole};
use crate::crd::rollout::Rollout;
use tracing::{info, warn};

/// Event announcing a successfully applied operation, if it is worth one
fn applied_event(op: &Operation) -> Option<RolloutEvent> {
    match op {
        Operation::PatchServiceSelector {
            role: ServiceRole::Active,
            service,
            target,
            ..
        } => Some(RolloutEvent::normal(
            "Promoted",
            "PatchService",
            format!("Active service {service} now selects pod template hash {target}"),
        )),
        Operation::PatchServiceSelector {
            role: ServiceRole::Preview,
            service,
            target,
            ..
        } => Some(RolloutEvent::normal(
            "PreviewUpdated",
            "PatchService",
            format!("Preview service {service} now selects pod template hash {target}"),
        )),
        Operation::ScaleDown(ScaleOp::MarkIntent {
            replica_set,
            deadline,
            scale_now,
            ..
        }) => Some(RolloutEvent::normal(
            "ScaleDownScheduled",
            "PatchReplicaSet",
            if *scale_now {
                format!("Scaled down ReplicaSet {replica_set}")
            } else {
                format!(
                    "ReplicaSet {replica_set} will be scaled down after {}",
                    deadline.to_rfc3339()
                )
            },
        )),
        Operation::ScaleDown(ScaleOp::ScaleToZero { replica_set, .. }) => Some(
            RolloutEvent::normal(
                "ScaledDown",
                "PatchReplicaSet",
                format!("Scaled down ReplicaSet {replica_set}"),
            ),
        ),
        Operation::ScaleDown(ScaleOp::Remove { replica_set, .. }) => Some(RolloutEvent::normal(
            "ReplicaSetPruned",
            "DeleteReplicaSet",
            format!("Deleted ReplicaSet {replica_set} beyond revision history limit"),
        )),
        Operation::PatchRolloutStatus { .. } => None,
    }
}

/// Apply planned operations in order
///
/// Stops at the first failure. A ReplicaSet that vanished since the snapshot is skipped
/// with a warning. A missing Service aborts with `ReconcileError::NotFound`, since the
/// status patch later in the plan assumes its selector was written. A 409 aborts with
/// `ReconcileError::Conflict`. Either way the rollout is re-planned from a fresh snapshot.
///
/// # Returns
/// Number of operations applied
pub async fn apply_operations(
    ctx: &Context,
    rollout: &Rollout,
    namespace: &str,
    operations: &[Operation],
) -> Result<usize, ReconcileError> {
    let rollout_name = rollout.metadata.name.as_deref().unwrap_or_default();
    let mut applied = 0;

    for op in operations {
        let (target, result) = match op {
            Operation::PatchServiceSelector { service, patch, .. } => (
                service.as_str(),
                ctx.store.patch_service(namespace, service, patch).await,
            ),
            Operation::ScaleDown(ScaleOp::MarkIntent {
                replica_set, patch, ..
            })
            | Operation::ScaleDown(ScaleOp::ScaleToZero { replica_set, patch }) => (
                replica_set.as_str(),
                ctx.store
                    .patch_replica_set(namespace, replica_set, patch)
                    .await,
            ),
            Operation::ScaleDown(ScaleOp::Remove { replica_set, uid }) => (
                replica_set.as_str(),
                ctx.store
                    .delete_replica_set(namespace, replica_set, uid.as_deref())
                    .await,
            ),
            Operation::PatchRolloutStatus { patch } => (
                rollout_name,
                ctx.store
                    .patch_rollout_status(namespace, rollout_name, patch)
                    .await,
            ),
        };

        match result {
            Ok(()) => {
                applied += 1;
                info!(
                    rollout = ?rollout_name,
                    operation = op.kind(),
                    target = %target,
                    "Operation applied"
                );
                if let Some(metrics) = &ctx.metrics {
                    metrics.record_operation(op.kind());
                    if matches!(
                        op,
                        Operation::PatchServiceSelector {
                            role: ServiceRole::Active,
                            ..
                        }
                    ) {
                        metrics.record_promotion();
                    }
                }
                if let Some(event) = applied_event(op) {
                    ctx.publish(rollout, event).await;
                }
            }
            Err(StoreError::NotFound { kind, name }) if matches!(op, Operation::ScaleDown(_)) => {
                warn!(
                    rollout = ?rollout_name,
                    operation = op.kind(),
                    kind,
                    name = %name,
                    "Object gone since snapshot, skipping operation"
                );
            }
            Err(e) => {
                warn!(
                    rollout = ?rollout_name,
                    operation = op.kind(),
                    target = %target,
                    error = %e,
                    "Operation failed, aborting remaining operations"
                );
                return Err(e.into());
            }
        }
    }

    Ok(applied)
}
