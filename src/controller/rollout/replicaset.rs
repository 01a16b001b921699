use super::reconcile::ReconcileError;
use super::store::RolloutStore;
use crate::controller::strategies::blue_green::patch::with_resource_version;
use crate::crd::rollout::{
    Rollout, DESIRED_REPLICAS_ANNOTATION, POD_TEMPLATE_HASH_LABEL, ROLLOUT_NAME_LABEL,
};
use k8s_openapi::api::apps::v1::{ReplicaSet, ReplicaSetSpec};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tracing::{debug, info};

/// Compute a stable 10-character hash for a PodTemplateSpec
///
/// Inspired by Kubernetes' pod-template-hash label concept, using FNV-1a:
/// - Serialize the template to JSON (deterministic)
/// - Mix in the collision count, if any
/// - Return 10-character hex string
///
/// Bumping the collision count yields a fresh hash for an unchanged template, which
/// is how a retired ReplicaSet name is avoided.
///
/// # Errors
/// Returns SerializationError if PodTemplateSpec cannot be serialized to JSON
pub fn compute_pod_template_hash(
    template: &PodTemplateSpec,
    collision_count: Option<i32>,
) -> Result<String, ReconcileError> {
    let json = serde_json::to_string(template)
        .map_err(|e| ReconcileError::SerializationError(e.to_string()))?;

    // FNV-1a (deterministic across processes, unlike DefaultHasher/SipHash)
    let mut hash: u64 = 0xcbf29ce484222325;
    let mut mix = |bytes: &[u8]| {
        for byte in bytes {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(0x100000001b3);
        }
    };
    mix(json.as_bytes());
    if let Some(count) = collision_count.filter(|c| *c > 0) {
        mix(&count.to_le_bytes());
    }

    Ok(format!("{hash:016x}")[..10].to_string())
}

/// Build the ReplicaSet for a pod template fingerprint
///
/// Creates a ReplicaSet with:
/// - Name: `{rollout-name}-{hash}`
/// - Labels: template labels + fingerprint + `rollouts.kulta.io/rollout` + `rollouts.kulta.io/managed`
/// - Selector: the same labels, so pods of different versions never overlap
/// - Owner reference to the Rollout (controller=true) for garbage collection
///
/// The `rollouts.kulta.io/managed=true` label prevents Kubernetes Deployment
/// controllers from adopting KULTA-managed ReplicaSets.
pub fn build_replicaset(rollout: &Rollout, pod_hash: &str) -> Result<ReplicaSet, ReconcileError> {
    let rollout_name = rollout
        .metadata
        .name
        .as_ref()
        .ok_or(ReconcileError::MissingName)?;
    let namespace = rollout.metadata.namespace.clone();

    let mut template = rollout.spec.template.clone();
    let mut labels = template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.clone())
        .unwrap_or_default();

    labels.insert(POD_TEMPLATE_HASH_LABEL.to_string(), pod_hash.to_string());
    labels.insert(ROLLOUT_NAME_LABEL.to_string(), rollout_name.clone());
    labels.insert("rollouts.kulta.io/managed".to_string(), "true".to_string());

    let mut template_metadata = template.metadata.take().unwrap_or_default();
    template_metadata.labels = Some(labels.clone());
    template.metadata = Some(template_metadata);

    let selector = LabelSelector {
        match_labels: Some(labels.clone()),
        ..Default::default()
    };

    Ok(ReplicaSet {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", rollout_name, pod_hash)),
            namespace,
            labels: Some(labels),
            owner_references: rollout.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(rollout.spec.replicas),
            selector,
            template: Some(template),
            ..Default::default()
        }),
        status: None,
    })
}

/// Whether a ReplicaSet is controlled by this Rollout
///
/// ReplicaSets without owner references (created before the Rollout had a uid, or
/// by hand with our labels) are accepted by label alone.
pub fn is_owned_by(rs: &ReplicaSet, rollout: &Rollout) -> bool {
    let Some(uid) = rollout.metadata.uid.as_deref() else {
        return true;
    };
    match rs.metadata.owner_references.as_deref() {
        None | Some([]) => true,
        Some(refs) => refs
            .iter()
            .any(|r| r.controller == Some(true) && r.uid == uid),
    }
}

/// Scale-down intent recorded on a ReplicaSet
pub fn is_retired(rs: &ReplicaSet) -> bool {
    rs.annotations()
        .get(DESIRED_REPLICAS_ANNOTATION)
        .is_some_and(|v| v == "0")
}

/// Outcome of making sure the ReplicaSet for the current template exists
#[derive(Debug, PartialEq, Eq)]
pub enum NewReplicaSet {
    /// Exists at the desired scale
    Unchanged,
    /// Existed with a different replica count and was rescaled
    Scaled,
    /// Did not exist and was created
    Created,
    /// The name is taken by a ReplicaSet already retired; a fresh hash is needed
    Retired,
}

/// Ensure the ReplicaSet for `pod_hash` exists at `spec.replicas`
///
/// A retired ReplicaSet (intent annotation "0") is never brought back: the caller
/// bumps `collisionCount` so the template hashes to a new name instead.
/// `replica_sets` is updated in place so it can be used as the planning snapshot.
///
/// # Arguments
/// * `store` - Object store
/// * `rollout` - The Rollout being reconciled
/// * `pod_hash` - Fingerprint of the current template
/// * `replica_sets` - ReplicaSets owned by the Rollout
pub async fn ensure_new_replicaset(
    store: &dyn RolloutStore,
    rollout: &Rollout,
    pod_hash: &str,
    replica_sets: &mut Vec<ReplicaSet>,
) -> Result<NewReplicaSet, ReconcileError> {
    let namespace = rollout.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let desired = build_replicaset(rollout, pod_hash)?;
    let rs_name = desired
        .metadata
        .name
        .clone()
        .ok_or(ReconcileError::ReplicaSetMissingName)?;

    let Some(index) = replica_sets
        .iter()
        .position(|rs| rs.metadata.name.as_deref() == Some(rs_name.as_str()))
    else {
        info!(
            replicaset = ?rs_name,
            replicas = rollout.spec.replicas,
            "Creating ReplicaSet"
        );
        let created = store.create_replica_set(&namespace, &desired).await?;
        replica_sets.push(created);
        return Ok(NewReplicaSet::Created);
    };
    let current = &mut replica_sets[index];

    if is_retired(current) {
        return Ok(NewReplicaSet::Retired);
    }

    let current_replicas = current.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    if current_replicas == rollout.spec.replicas {
        debug!(
            replicaset = ?rs_name,
            replicas = current_replicas,
            "ReplicaSet already at correct scale"
        );
        return Ok(NewReplicaSet::Unchanged);
    }

    info!(
        replicaset = ?rs_name,
        current = current_replicas,
        desired = rollout.spec.replicas,
        "Scaling ReplicaSet"
    );
    let scale_patch = with_resource_version(
        &current.metadata,
        json!({ "spec": { "replicas": rollout.spec.replicas } }),
    );
    store
        .patch_replica_set(&namespace, &rs_name, &scale_patch)
        .await?;

    // Promotion compares availability against the new desired count
    if let Some(spec) = current.spec.as_mut() {
        spec.replicas = Some(rollout.spec.replicas);
    }
    Ok(NewReplicaSet::Scaled)
}
