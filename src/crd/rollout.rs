use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Label carried by every ReplicaSet (and its pods) that names the pod template fingerprint.
/// Service selectors use the same key to pick the ReplicaSet they route to.
pub const POD_TEMPLATE_HASH_LABEL: &str = "rollouts-pod-template-hash";

/// Label linking a ReplicaSet back to the Rollout that owns it
pub const ROLLOUT_NAME_LABEL: &str = "rollouts.kulta.io/rollout";

/// Scale-down intent recorded on a superseded ReplicaSet ("0" once retired)
pub const DESIRED_REPLICAS_ANNOTATION: &str = "rollouts.kulta.io/desired-replicas";

/// RFC3339 instant after which a retired ReplicaSet may be physically scaled to zero
pub const SCALE_DOWN_DEADLINE_ANNOTATION: &str = "rollouts.kulta.io/scale-down-deadline";

/// Number of superseded ReplicaSets kept around when `revisionHistoryLimit` is unset
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;

/// Seconds a retired ReplicaSet keeps its pods before being scaled to zero
pub const DEFAULT_SCALE_DOWN_DELAY_SECONDS: i32 = 30;

/// Rollout is a Custom Resource for managing blue-green progressive delivery
///
/// Compatible with the Argo Rollouts blue-green API for easy migration
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "kulta.io",
    version = "v1alpha1",
    kind = "Rollout",
    namespaced,
    status = "RolloutStatus",
    printcolumn = r#"{"name":"Desired", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Current", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Available", "type":"integer", "jsonPath":".status.availableReplicas"}"#,
    printcolumn = r#"{"name":"Active", "type":"string", "jsonPath":".status.blueGreen.activeSelector"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
pub struct RolloutSpec {
    /// Number of desired pods
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Label selector for pods
    pub selector: LabelSelector,

    /// Template describes the pods that will be created
    pub template: PodTemplateSpec,

    /// Deployment strategy
    pub strategy: RolloutStrategy,

    /// Number of superseded ReplicaSets to retain (defaults to 10)
    #[serde(
        rename = "revisionHistoryLimit",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision_history_limit: Option<i32>,
}

fn default_replicas() -> i32 {
    1
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct RolloutStrategy {
    /// Blue-Green deployment strategy
    #[serde(rename = "blueGreen", skip_serializing_if = "Option::is_none")]
    pub blue_green: Option<BlueGreenStrategy>,
}

/// Blue-Green deployment strategy
///
/// The active service receives production traffic and is switched to the new
/// ReplicaSet only once it is fully available (and verified, when a preview
/// service is configured). The preview service always follows the newest ReplicaSet.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct BlueGreenStrategy {
    /// Name of the service that selects active pods (receives production traffic)
    #[serde(rename = "activeService", default)]
    pub active_service: String,

    /// Name of the service that selects preview pods (optional, empty when unused)
    #[serde(rename = "previewService", default)]
    pub preview_service: String,

    /// Seconds to keep a superseded ReplicaSet's pods after it stops receiving traffic
    #[serde(
        rename = "scaleDownDelaySeconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub scale_down_delay_seconds: Option<i32>,
}

/// Preview verification flag
///
/// Stored in status as an optional bool; absent is a distinct state from `false`
/// but both let promotion proceed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum VerifyingPreview {
    #[default]
    Unset,
    True,
    False,
}

impl VerifyingPreview {
    pub fn is_unset(&self) -> bool {
        matches!(self, VerifyingPreview::Unset)
    }

    /// Unset reads as false
    pub fn as_bool(self) -> bool {
        matches!(self, VerifyingPreview::True)
    }
}

impl From<Option<bool>> for VerifyingPreview {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => VerifyingPreview::Unset,
            Some(true) => VerifyingPreview::True,
            Some(false) => VerifyingPreview::False,
        }
    }
}

impl From<VerifyingPreview> for Option<bool> {
    fn from(value: VerifyingPreview) -> Self {
        match value {
            VerifyingPreview::Unset => None,
            VerifyingPreview::True => Some(true),
            VerifyingPreview::False => Some(false),
        }
    }
}

/// Type of a Rollout condition
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionType {
    /// The active service routes to a ReplicaSet with available pods
    Available,
    /// The rollout is moving toward (or has reached) its desired state
    Progressing,
}

/// Status of a condition, mirrors the Kubernetes convention
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// A typed fact about the Rollout
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct RolloutCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,

    pub status: ConditionStatus,

    /// Machine-readable CamelCase reason
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the status flipped (RFC3339)
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: String,

    /// Last time reason or message changed (RFC3339)
    #[serde(rename = "lastUpdateTime")]
    pub last_update_time: String,
}

/// Fingerprints the blue-green services were last pointed at
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct BlueGreenStatus {
    #[serde(rename = "activeSelector", skip_serializing_if = "Option::is_none")]
    pub active_selector: Option<String>,

    #[serde(rename = "previewSelector", skip_serializing_if = "Option::is_none")]
    pub preview_selector: Option<String>,
}

/// Status of the Rollout
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct RolloutStatus {
    /// Pods of the new ReplicaSet
    #[serde(default)]
    pub replicas: i32,

    /// Ready pods of the new ReplicaSet
    #[serde(rename = "readyReplicas", default)]
    pub ready_replicas: i32,

    /// Available pods of the new ReplicaSet
    #[serde(rename = "availableReplicas", default)]
    pub available_replicas: i32,

    /// Pods running the current template
    #[serde(rename = "updatedReplicas", default)]
    pub updated_replicas: i32,

    /// Fingerprint of the pod template currently treated as "new"
    #[serde(rename = "currentPodHash", skip_serializing_if = "Option::is_none")]
    pub current_pod_hash: Option<String>,

    /// Step bookkeeping, owned by the step workflow
    #[serde(rename = "currentStepIndex", skip_serializing_if = "Option::is_none")]
    pub current_step_index: Option<i32>,

    /// Step bookkeeping, owned by the step workflow
    #[serde(rename = "currentStepHash", skip_serializing_if = "Option::is_none")]
    pub current_step_hash: Option<String>,

    /// Set by the verification workflow while the preview is under review
    #[serde(
        rename = "verifyingPreview",
        default,
        skip_serializing_if = "VerifyingPreview::is_unset"
    )]
    #[schemars(with = "Option<bool>")]
    pub verifying_preview: VerifyingPreview,

    /// Bumped to derive a fresh pod hash when the hashed ReplicaSet name is taken
    #[serde(rename = "collisionCount", skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<i32>,

    /// metadata.generation of the spec this status was computed from
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Service selector bookkeeping
    #[serde(rename = "blueGreen", skip_serializing_if = "Option::is_none")]
    pub blue_green: Option<BlueGreenStatus>,

    /// Conditions keyed by type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<RolloutCondition>,
}

impl RolloutStatus {
    /// Look up a condition by type
    pub fn condition(&self, type_: ConditionType) -> Option<&RolloutCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

#[cfg(test)]
#[path = "rollout_test.rs"]
mod tests;
