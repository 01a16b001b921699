use super::classify::replicaset_hash;
use super::selector::service_hash;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;

/// Outcome of the promotion decision for one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionDecision {
    /// The ReplicaSet for the current template does not exist yet
    NoNewReplicaSet,
    /// The active Service is not configured or was not found
    NoActiveService,
    /// The active Service already routes to the new ReplicaSet
    AlreadyPromoted,
    /// Preview verification is in progress
    Withheld,
    /// Switch the active Service to `target`
    Promote { target: String },
    /// The new ReplicaSet is not fully available yet
    AwaitingAvailability { available: i32, desired: i32 },
}

impl PromotionDecision {
    /// Whether the active Service ends up routing to the new ReplicaSet after this plan
    pub fn is_promoted(&self) -> bool {
        matches!(
            self,
            PromotionDecision::Promote { .. } | PromotionDecision::AlreadyPromoted
        )
    }
}

/// Desired replicas of a ReplicaSet (Kubernetes defaults an unset count to 1)
pub fn desired_replicas(rs: &ReplicaSet) -> i32 {
    rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

/// Available replicas of a ReplicaSet as last observed
pub fn available_replicas(rs: &ReplicaSet) -> i32 {
    rs.status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

/// Decide whether the active Service should be switched to the new ReplicaSet
///
/// A realised promotion is reported before the gate is consulted so the
/// verification flag gets cleared even if the workflow left it set.
///
/// # Arguments
/// * `new` - The ReplicaSet running the current template
/// * `active_service` - The active Service, `None` if unconfigured or missing
/// * `gate_withheld` - Result of the preview verification gate
pub fn decide_promotion(
    new: Option<&ReplicaSet>,
    active_service: Option<&Service>,
    gate_withheld: bool,
) -> PromotionDecision {
    let Some(new) = new else {
        return PromotionDecision::NoNewReplicaSet;
    };
    let Some(active) = active_service else {
        return PromotionDecision::NoActiveService;
    };
    let Some(new_hash) = replicaset_hash(new) else {
        return PromotionDecision::NoNewReplicaSet;
    };

    if service_hash(active) == Some(new_hash) {
        return PromotionDecision::AlreadyPromoted;
    }

    if gate_withheld {
        return PromotionDecision::Withheld;
    }

    let available = available_replicas(new);
    let desired = desired_replicas(new);
    if available >= desired {
        PromotionDecision::Promote {
            target: new_hash.to_string(),
        }
    } else {
        PromotionDecision::AwaitingAvailability { available, desired }
    }
}
