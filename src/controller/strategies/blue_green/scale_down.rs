//! Two-phase retirement of superseded ReplicaSets
//!
//! Phase one records intent (`desired-replicas: "0"` plus a deadline). Phase two sets
//! `spec.replicas: 0` once the deadline has passed, so in-flight requests to the old
//! version can drain after the active Service has moved on.

use super::classify::replicaset_hash;
use super::patch::with_resource_version;
use crate::crd::rollout::{DESIRED_REPLICAS_ANNOTATION, SCALE_DOWN_DEADLINE_ANNOTATION};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::ReplicaSet;
use serde_json::{json, Value};

/// A write against a superseded ReplicaSet
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleOp {
    /// Annotate scale-down intent and its deadline (and scale to zero when there is no delay)
    MarkIntent {
        replica_set: String,
        deadline: DateTime<Utc>,
        scale_now: bool,
        patch: Value,
    },
    /// Deadline passed, drop the pods
    ScaleToZero { replica_set: String, patch: Value },
    /// Beyond the revision history limit
    Remove {
        replica_set: String,
        uid: Option<String>,
    },
}

impl ScaleOp {
    pub fn replica_set(&self) -> &str {
        match self {
            ScaleOp::MarkIntent { replica_set, .. }
            | ScaleOp::ScaleToZero { replica_set, .. }
            | ScaleOp::Remove { replica_set, .. } => replica_set,
        }
    }
}

/// Result of scale-down planning
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScaleDownPlan {
    pub ops: Vec<ScaleOp>,
    /// Earliest deadline still in the future, the caller should look again by then
    pub next_deadline: Option<DateTime<Utc>>,
}

fn annotation<'a>(rs: &'a ReplicaSet, key: &str) -> Option<&'a str> {
    rs.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

fn spec_replicas(rs: &ReplicaSet) -> i32 {
    rs.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

/// Plan the retirement of old ReplicaSets
///
/// # Arguments
/// * `old_groups` - Old ReplicaSets, newest first
/// * `active_hash` - Fingerprint the active Service routes to; `None` makes nothing eligible
/// * `history_limit` - How many old groups to keep, counting the active-targeted one
///   (negative treated as 0)
/// * `delay` - Time between intent and the physical scale to zero
/// * `now` - Snapshot time
pub fn plan_scale_down(
    old_groups: &[&ReplicaSet],
    active_hash: Option<&str>,
    history_limit: i32,
    delay: Duration,
    now: DateTime<Utc>,
) -> ScaleDownPlan {
    let mut plan = ScaleDownPlan::default();
    let Some(active_hash) = active_hash else {
        return plan;
    };

    let keep = usize::try_from(history_limit).unwrap_or(0);

    // Every old group counts toward the limit; only the active-targeted one is exempt from writes
    for (index, rs) in old_groups.iter().copied().enumerate() {
        if replicaset_hash(rs) == Some(active_hash) {
            continue;
        }
        let Some(name) = rs.metadata.name.clone() else {
            continue;
        };
        let marked = annotation(rs, DESIRED_REPLICAS_ANNOTATION) == Some("0");

        if !marked {
            let deadline = now + delay;
            let scale_now = delay <= Duration::zero();
            let mut body = json!({
                "metadata": {
                    "annotations": {
                        DESIRED_REPLICAS_ANNOTATION: "0",
                        SCALE_DOWN_DEADLINE_ANNOTATION: deadline.to_rfc3339_opts(SecondsFormat::Secs, true)
                    }
                }
            });
            if scale_now {
                body["spec"] = json!({ "replicas": 0 });
            }
            plan.ops.push(ScaleOp::MarkIntent {
                replica_set: name.clone(),
                deadline,
                scale_now,
                patch: with_resource_version(&rs.metadata, body),
            });
            if !scale_now && index < keep {
                plan.next_deadline = earliest(plan.next_deadline, deadline);
            }
        } else if index < keep && spec_replicas(rs) > 0 {
            let deadline = annotation(rs, SCALE_DOWN_DEADLINE_ANNOTATION)
                .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                .map(|d| d.with_timezone(&Utc));
            match deadline {
                Some(deadline) if deadline > now => {
                    plan.next_deadline = earliest(plan.next_deadline, deadline);
                }
                _ => plan.ops.push(ScaleOp::ScaleToZero {
                    replica_set: name.clone(),
                    patch: with_resource_version(&rs.metadata, json!({"spec": {"replicas": 0}})),
                }),
            }
        }

        if index >= keep {
            plan.ops.push(ScaleOp::Remove {
                replica_set: name,
                uid: rs.metadata.uid.clone(),
            });
        }
    }

    plan
}

fn earliest(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(current.map_or(candidate, |c| c.min(candidate)))
}
