use super::classify::replicaset_hash;
use super::patch::{merge_diff, with_resource_version};
use super::promotion::{available_replicas, PromotionDecision};
use crate::controller::strategies::StrategyError;
use crate::crd::rollout::{
    BlueGreenStatus, ConditionStatus, ConditionType, Rollout, RolloutCondition, RolloutStatus,
    VerifyingPreview,
};
use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::ReplicaSet;
use serde_json::{json, Value};

pub const AVAILABLE_MESSAGE: &str = "Rollout is serving traffic from the active service.";
pub const NOT_AVAILABLE_MESSAGE: &str = "Rollout is not serving traffic from the active service.";

/// Everything the status synthesizer folds into the next status
pub struct StatusInputs<'a> {
    pub rollout: &'a Rollout,
    pub pod_hash: &'a str,
    pub new: Option<&'a ReplicaSet>,
    pub replica_sets: &'a [ReplicaSet],
    pub decision: &'a PromotionDecision,
    /// Fingerprint the active Service routes to once this plan is applied
    pub active_hash: Option<&'a str>,
    /// Fingerprint the preview Service routes to once this plan is applied
    pub preview_hash: Option<&'a str>,
    /// Set when the active Service is configured but was not found
    pub active_missing: bool,
    pub now: DateTime<Utc>,
}

fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Insert or update a condition keeping its timestamps honest
///
/// Unchanged conditions are left as they are. A new reason or message only refreshes
/// `lastUpdateTime`; `lastTransitionTime` moves only when the status flips.
pub fn set_condition(
    conditions: &mut Vec<RolloutCondition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) {
    let ts = timestamp(now);
    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => {
            if existing.status == status
                && existing.reason == reason
                && existing.message == message
            {
                return;
            }
            if existing.status != status {
                existing.last_transition_time = ts.clone();
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.last_update_time = ts;
        }
        None => conditions.push(RolloutCondition {
            type_,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: ts.clone(),
            last_update_time: ts,
        }),
    }
}

fn progressing(inputs: &StatusInputs<'_>) -> (ConditionStatus, &'static str, String) {
    match inputs.decision {
        PromotionDecision::NoNewReplicaSet => (
            ConditionStatus::True,
            "NewReplicaSetPending",
            format!(
                "Waiting for ReplicaSet with pod template hash {}",
                inputs.pod_hash
            ),
        ),
        PromotionDecision::NoActiveService if inputs.active_missing => (
            ConditionStatus::False,
            "ActiveServiceNotFound",
            "Active service does not exist".to_string(),
        ),
        PromotionDecision::NoActiveService => (
            ConditionStatus::False,
            "ActiveServiceNotConfigured",
            "No active service is configured, the rollout cannot be promoted".to_string(),
        ),
        PromotionDecision::Withheld => (
            ConditionStatus::True,
            "AwaitingPreviewVerification",
            format!(
                "Preview of pod template hash {} is awaiting verification",
                inputs.pod_hash
            ),
        ),
        PromotionDecision::AwaitingAvailability { available, desired } => (
            ConditionStatus::True,
            "ReplicaSetUpdated",
            format!(
                "ReplicaSet {} has {available}/{desired} available replicas",
                inputs.pod_hash
            ),
        ),
        PromotionDecision::Promote { .. } | PromotionDecision::AlreadyPromoted => (
            ConditionStatus::True,
            "NewReplicaSetAvailable",
            format!(
                "Active service is serving pod template hash {}",
                inputs.pod_hash
            ),
        ),
    }
}

fn active_is_available(inputs: &StatusInputs<'_>) -> bool {
    let Some(active_hash) = inputs.active_hash else {
        return false;
    };
    inputs
        .replica_sets
        .iter()
        .any(|rs| replicaset_hash(rs) == Some(active_hash) && available_replicas(rs) >= 1)
}

/// Compute the next status from the persisted one
pub fn synthesize_status(inputs: &StatusInputs<'_>) -> RolloutStatus {
    let mut status = inputs.rollout.status.clone().unwrap_or_default();

    status.current_pod_hash = Some(inputs.pod_hash.to_string());
    if inputs.decision.is_promoted() {
        status.verifying_preview = VerifyingPreview::Unset;
    }

    let blue_green = BlueGreenStatus {
        active_selector: inputs.active_hash.map(str::to_string),
        preview_selector: inputs.preview_hash.map(str::to_string),
    };
    status.blue_green = if blue_green == BlueGreenStatus::default() {
        None
    } else {
        Some(blue_green)
    };

    let counters = inputs.new.and_then(|rs| rs.status.as_ref());
    status.replicas = counters.map(|s| s.replicas).unwrap_or(0);
    status.updated_replicas = status.replicas;
    status.ready_replicas = counters.and_then(|s| s.ready_replicas).unwrap_or(0);
    status.available_replicas = counters.and_then(|s| s.available_replicas).unwrap_or(0);

    if inputs.rollout.metadata.generation.is_some() {
        status.observed_generation = inputs.rollout.metadata.generation;
    }

    let available = active_is_available(inputs);
    set_condition(
        &mut status.conditions,
        ConditionType::Available,
        ConditionStatus::from(available),
        "Available",
        if available {
            AVAILABLE_MESSAGE
        } else {
            NOT_AVAILABLE_MESSAGE
        },
        inputs.now,
    );

    let (progressing_status, reason, message) = progressing(inputs);
    set_condition(
        &mut status.conditions,
        ConditionType::Progressing,
        progressing_status,
        reason,
        &message,
        inputs.now,
    );

    status
}

/// Status for a rollout whose configuration cannot be acted on
pub fn invalid_spec_status(rollout: &Rollout, message: &str, now: DateTime<Utc>) -> RolloutStatus {
    let mut status = rollout.status.clone().unwrap_or_default();
    if rollout.metadata.generation.is_some() {
        status.observed_generation = rollout.metadata.generation;
    }
    set_condition(
        &mut status.conditions,
        ConditionType::Progressing,
        ConditionStatus::False,
        "InvalidSpec",
        message,
        now,
    );
    status
}

/// Merge patch for the status subresource, `None` when nothing changed
pub fn status_patch(
    rollout: &Rollout,
    next: &RolloutStatus,
) -> Result<Option<Value>, StrategyError> {
    let current = serde_json::to_value(rollout.status.clone().unwrap_or_default())?;
    let next = serde_json::to_value(next)?;

    Ok(merge_diff(&current, &next)
        .map(|diff| with_resource_version(&rollout.metadata, json!({ "status": diff }))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_new_condition_gets_both_timestamps() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            ConditionType::Available,
            ConditionStatus::True,
            "Available",
            AVAILABLE_MESSAGE,
            at("2024-06-01T12:00:00Z"),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, "2024-06-01T12:00:00Z");
        assert_eq!(conditions[0].last_update_time, "2024-06-01T12:00:00Z");
    }

    #[test]
    fn test_unchanged_condition_keeps_timestamps() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            ConditionType::Available,
            ConditionStatus::True,
            "Available",
            AVAILABLE_MESSAGE,
            at("2024-06-01T12:00:00Z"),
        );
        let before = conditions.clone();
        set_condition(
            &mut conditions,
            ConditionType::Available,
            ConditionStatus::True,
            "Available",
            AVAILABLE_MESSAGE,
            at("2024-06-01T13:00:00Z"),
        );
        assert_eq!(conditions, before);
    }

    #[test]
    fn test_message_change_refreshes_update_time_only() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            ConditionType::Progressing,
            ConditionStatus::True,
            "ReplicaSetUpdated",
            "0/3",
            at("2024-06-01T12:00:00Z"),
        );
        set_condition(
            &mut conditions,
            ConditionType::Progressing,
            ConditionStatus::True,
            "ReplicaSetUpdated",
            "2/3",
            at("2024-06-01T12:05:00Z"),
        );
        assert_eq!(conditions[0].message, "2/3");
        assert_eq!(conditions[0].last_transition_time, "2024-06-01T12:00:00Z");
        assert_eq!(conditions[0].last_update_time, "2024-06-01T12:05:00Z");
    }

    #[test]
    fn test_status_flip_refreshes_both_times() {
        let mut conditions = vec![];
        set_condition(
            &mut conditions,
            ConditionType::Available,
            ConditionStatus::False,
            "Available",
            NOT_AVAILABLE_MESSAGE,
            at("2024-06-01T12:00:00Z"),
        );
        set_condition(
            &mut conditions,
            ConditionType::Available,
            ConditionStatus::True,
            "Available",
            AVAILABLE_MESSAGE,
            at("2024-06-01T12:10:00Z"),
        );
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_eq!(conditions[0].last_transition_time, "2024-06-01T12:10:00Z");
        assert_eq!(conditions[0].last_update_time, "2024-06-01T12:10:00Z");
    }
}
