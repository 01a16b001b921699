//! Object fixtures shared by the blue-green unit tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::crd::rollout::{
    Rollout, DESIRED_REPLICAS_ANNOTATION, POD_TEMPLATE_HASH_LABEL, ROLLOUT_NAME_LABEL,
    SCALE_DOWN_DEADLINE_ANNOTATION,
};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use serde_json::json;

/// Rollout "app" in "default" with one replica and the given Service names
pub fn rollout(active: &str, preview: &str) -> Rollout {
    serde_json::from_value(json!({
        "apiVersion": "kulta.io/v1alpha1",
        "kind": "Rollout",
        "metadata": {
            "name": "app",
            "namespace": "default",
            "uid": "rollout-uid",
            "generation": 1,
            "resourceVersion": "7"
        },
        "spec": {
            "replicas": 1,
            "selector": {"matchLabels": {"app": "demo"}},
            "template": {
                "metadata": {"labels": {"app": "demo"}},
                "spec": {"containers": [{"name": "app", "image": "demo:1"}]}
            },
            "strategy": {
                "blueGreen": {
                    "activeService": active,
                    "previewService": preview
                }
            }
        }
    }))
    .expect("valid rollout fixture")
}

/// ReplicaSet of rollout "app" labelled with `hash`, created at `created` (RFC3339)
pub fn replicaset(
    name: &str,
    hash: &str,
    created: &str,
    replicas: i32,
    available: i32,
) -> ReplicaSet {
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "namespace": "default",
            "uid": format!("{name}-uid"),
            "resourceVersion": "1",
            "creationTimestamp": created,
            "labels": {
                "app": "demo",
                POD_TEMPLATE_HASH_LABEL: hash,
                ROLLOUT_NAME_LABEL: "app"
            }
        },
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app": "demo", POD_TEMPLATE_HASH_LABEL: hash}}
        },
        "status": {
            "replicas": replicas,
            "readyReplicas": available,
            "availableReplicas": available
        }
    }))
    .expect("valid replicaset fixture")
}

/// Mark a ReplicaSet as retired with the given deadline annotation
pub fn annotate(mut rs: ReplicaSet, deadline: &str) -> ReplicaSet {
    let annotations = rs.metadata.annotations.get_or_insert_with(Default::default);
    annotations.insert(DESIRED_REPLICAS_ANNOTATION.to_string(), "0".to_string());
    annotations.insert(
        SCALE_DOWN_DEADLINE_ANNOTATION.to_string(),
        deadline.to_string(),
    );
    rs
}

/// Service selecting `app=demo`, bound to `hash` when given
pub fn service(name: &str, hash: Option<&str>) -> Service {
    let mut selector = json!({"app": "demo"});
    if let Some(hash) = hash {
        selector[POD_TEMPLATE_HASH_LABEL] = json!(hash);
    }
    serde_json::from_value(json!({
        "metadata": {
            "name": name,
            "namespace": "default",
            "resourceVersion": "1"
        },
        "spec": {"selector": selector}
    }))
    .expect("valid service fixture")
}
