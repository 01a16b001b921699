use super::*;
use crate::controller::clock::FixedClock;
use crate::controller::events::MockEventSink;
use crate::controller::strategies::blue_green::testing::{annotate, replicaset, rollout, service};
use crate::controller::strategies::blue_green::{self, Plan, PromotionDecision, Snapshot};
use crate::crd::rollout::{ConditionStatus, ConditionType, Rollout, POD_TEMPLATE_HASH_LABEL};
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    store: Arc<MemoryStore>,
    events: MockEventSink,
    ctx: Arc<Context>,
}

fn harness(store: MemoryStore) -> Harness {
    let store = Arc::new(store);
    let events = MockEventSink::new();
    let ctx = Arc::new(Context::new_mock(
        store.clone(),
        Arc::new(events.clone()),
        Arc::new(FixedClock::at("2024-06-01T12:00:00Z")),
    ));
    Harness { store, events, ctx }
}

impl Harness {
    /// Reconcile the rollout as currently stored, like the watcher would deliver it
    async fn reconcile(&self) -> Result<Action, ReconcileError> {
        reconcile(Arc::new(self.store.rollout()), self.ctx.clone()).await
    }
}

fn pod_hash(r: &Rollout) -> String {
    compute_pod_template_hash(&r.spec.template, None).unwrap()
}

/// Plan against an observed snapshot that may differ from what the store holds by write time
fn plan_from(r: &Rollout, replica_sets: &[ReplicaSet], active: Option<&Service>) -> Plan {
    let now = DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc);
    blue_green::plan(&Snapshot {
        rollout: r,
        replica_sets,
        active_service: active,
        preview_service: None,
        pod_hash: "new",
        now,
    })
    .unwrap()
}

fn active_selector(store: &MemoryStore, name: &str) -> Option<String> {
    store
        .service(name)?
        .spec?
        .selector?
        .get(POD_TEMPLATE_HASH_LABEL)
        .cloned()
}

#[test]
fn test_requeue_interval_uses_default_and_clamps() {
    let default = Duration::from_secs(30);

    assert_eq!(calculate_requeue_interval(None, default), default);
    assert_eq!(
        calculate_requeue_interval(Some(Duration::from_secs(12)), default),
        Duration::from_secs(12)
    );
    assert_eq!(
        calculate_requeue_interval(Some(Duration::from_secs(90)), default),
        default
    );
    assert_eq!(
        calculate_requeue_interval(Some(Duration::from_secs(1)), default),
        Duration::from_secs(5)
    );
    assert_eq!(
        calculate_requeue_interval(None, Duration::from_secs(3600)),
        Duration::from_secs(300)
    );
}

#[test]
fn test_error_metric_labels() {
    assert_eq!(
        ReconcileError::Conflict("x".into()).metric_label(),
        "conflict"
    );
    assert_eq!(
        ReconcileError::InvalidConfiguration("x".into()).metric_label(),
        "invalid"
    );
    assert_eq!(ReconcileError::MissingNamespace.metric_label(), "error");
}

#[tokio::test]
async fn test_first_reconcile_creates_new_replicaset_without_promoting() {
    let r = rollout("active", "");
    let hash = pod_hash(&r);
    let h = harness(MemoryStore::new(r).with_service(service("active", None)));

    let action = h.reconcile().await.unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
    assert_eq!(
        h.store.writes(),
        vec![
            format!("create ReplicaSet app-{hash}"),
            "patch Rollout app status".to_string()
        ]
    );
    assert_eq!(active_selector(&h.store, "active"), None);
    assert_eq!(h.events.reasons(), vec!["ReplicaSetCreated"]);

    let status = h.store.rollout().status.unwrap();
    assert_eq!(status.current_pod_hash.as_deref(), Some(hash.as_str()));
    assert_eq!(
        status.condition(ConditionType::Available).unwrap().status,
        ConditionStatus::False
    );
}

#[tokio::test]
async fn test_available_replicaset_is_promoted_then_settles() {
    let r = rollout("active", "");
    let hash = pod_hash(&r);
    let h = harness(
        MemoryStore::new(r)
            .with_service(service("active", Some("old")))
            .with_replica_set(replicaset(
                &format!("app-{hash}"),
                &hash,
                "2024-06-01T11:00:00Z",
                1,
                1,
            ))
            .with_replica_set(replicaset("app-old", "old", "2024-05-01T11:00:00Z", 1, 1)),
    );

    h.reconcile().await.unwrap();

    assert_eq!(active_selector(&h.store, "active"), Some(hash.clone()));
    assert_eq!(
        h.store.writes(),
        vec![
            "patch Service active".to_string(),
            "patch ReplicaSet app-old".to_string(),
            "patch Rollout app status".to_string()
        ]
    );
    assert_eq!(
        h.events.reasons(),
        vec!["Promoted", "ScaleDownScheduled"]
    );
    let status = h.store.rollout().status.unwrap();
    assert_eq!(
        status.condition(ConditionType::Available).unwrap().status,
        ConditionStatus::True
    );

    // Nothing left to do on the next pass
    let action = h.reconcile().await.unwrap();
    assert_eq!(h.store.writes().len(), 3);
    assert_eq!(action, Action::requeue(Duration::from_secs(30)));
}

#[tokio::test]
async fn test_stale_rollout_aborts_with_conflict() {
    let r = rollout("active", "");
    let hash = pod_hash(&r);
    let h = harness(
        MemoryStore::new(r.clone())
            .with_service(service("active", None))
            .with_replica_set(replicaset(
                &format!("app-{hash}"),
                &hash,
                "2024-06-01T11:00:00Z",
                1,
                0,
            )),
    );

    let mut stale = r;
    stale.metadata.resource_version = Some("3".to_string());
    let err = reconcile(Arc::new(stale.clone()), h.ctx.clone())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Conflict(_)));
    assert_eq!(
        error_policy(Arc::new(stale), &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(2))
    );
}

#[tokio::test]
async fn test_invalid_rollout_reports_and_errors() {
    let r = rollout("", "");
    let h = harness(MemoryStore::new(r));

    let err = h.reconcile().await.unwrap_err();

    assert!(matches!(err, ReconcileError::InvalidConfiguration(_)));
    assert_eq!(h.store.writes(), vec!["patch Rollout app status"]);
    assert_eq!(h.events.reasons(), vec!["InvalidSpec"]);
    let status = h.store.rollout().status.unwrap();
    let progressing = status.condition(ConditionType::Progressing).unwrap();
    assert_eq!(progressing.status, ConditionStatus::False);
    assert_eq!(progressing.reason, "InvalidSpec");
    assert_eq!(
        error_policy(Arc::new(h.store.rollout()), &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(10))
    );
}

#[tokio::test]
async fn test_retired_replicaset_for_current_hash_bumps_collision_count() {
    let r = rollout("active", "");
    let hash = pod_hash(&r);
    let h = harness(
        MemoryStore::new(r)
            .with_service(service("active", Some("other")))
            .with_replica_set(annotate(
                replicaset(
                    &format!("app-{hash}"),
                    &hash,
                    "2024-06-01T11:00:00Z",
                    0,
                    0,
                ),
                "2024-06-01T11:00:30Z",
            )),
    );

    h.reconcile().await.unwrap();

    assert_eq!(h.store.writes(), vec!["patch Rollout app status"]);
    let status = h.store.rollout().status.unwrap();
    assert_eq!(status.collision_count, Some(1));

    // The next pass works with a fresh hash and creates a new ReplicaSet
    h.reconcile().await.unwrap();
    let fresh = compute_pod_template_hash(&h.store.rollout().spec.template, Some(1)).unwrap();
    assert_ne!(fresh, hash);
    assert!(h
        .store
        .writes()
        .contains(&format!("create ReplicaSet app-{fresh}")));
}

#[tokio::test]
async fn test_missing_service_is_a_warning_event() {
    let r = rollout("active", "preview");
    let hash = pod_hash(&r);
    let h = harness(
        MemoryStore::new(r)
            .with_service(service("active", None))
            .with_replica_set(replicaset(
                &format!("app-{hash}"),
                &hash,
                "2024-06-01T11:00:00Z",
                1,
                0,
            )),
    );

    h.reconcile().await.unwrap();

    let events = h.events.get_emitted_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, "ServiceNotFound");
    assert_eq!(events[0].kind, crate::controller::events::EventKind::Warning);
    assert!(events[0].note.contains("preview"));
}

#[tokio::test]
async fn test_service_deleted_before_promotion_aborts_without_status() {
    let r = rollout("active", "");
    let new_rs = replicaset("app-new", "new", "2024-06-01T11:00:00Z", 1, 1);
    let observed_active = service("active", None);
    let plan = plan_from(&r, &[new_rs.clone()], Some(&observed_active));
    assert!(matches!(
        plan.promotion,
        Some(PromotionDecision::Promote { .. })
    ));

    // The active Service is gone by the time the selector is written
    let h = harness(MemoryStore::new(r.clone()).with_replica_set(new_rs));
    let err = apply_operations(&h.ctx, &r, "default", &plan.operations)
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::NotFound(_)));
    assert!(h.store.writes().is_empty());
    assert!(h.store.rollout().status.is_none());
    assert!(h.events.reasons().is_empty());
    assert_eq!(
        error_policy(Arc::new(r), &err, h.ctx.clone()),
        Action::requeue(Duration::from_secs(2))
    );
}

#[tokio::test]
async fn test_replicaset_deleted_before_scale_down_is_skipped() {
    let r = rollout("active", "");
    let new_rs = replicaset("app-new", "new", "2024-06-01T11:00:00Z", 1, 1);
    let old_rs = replicaset("app-old", "old", "2024-05-01T11:00:00Z", 1, 1);
    let active = service("active", Some("new"));
    let plan = plan_from(&r, &[new_rs.clone(), old_rs], Some(&active));
    assert_eq!(
        plan.operations.iter().map(|op| op.kind()).collect::<Vec<_>>(),
        vec!["mark_scale_down", "patch_rollout_status"]
    );

    // app-old was deleted by someone else after the snapshot
    let h = harness(
        MemoryStore::new(r.clone())
            .with_service(active)
            .with_replica_set(new_rs),
    );
    let applied = apply_operations(&h.ctx, &r, "default", &plan.operations)
        .await
        .unwrap();

    assert_eq!(applied, 1);
    assert_eq!(h.store.writes(), vec!["patch Rollout app status"]);
}
