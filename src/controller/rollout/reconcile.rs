use super::apply::apply_operations;
use super::replicaset::{compute_pod_template_hash, ensure_new_replicaset, is_owned_by, NewReplicaSet};
use super::store::{KubeStore, RolloutStore, StoreError};
use super::validation::validate_rollout;
use crate::config::ControllerConfig;
use crate::controller::clock::{Clock, SystemClock};
use crate::controller::events::{EventSink, KubeEventSink, RolloutEvent};
use crate::controller::strategies::blue_green::{self, patch::with_resource_version, Snapshot};
use crate::crd::rollout::Rollout;
use crate::server::SharedMetrics;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Lower bound for the periodic requeue
const MIN_REQUEUE: Duration = Duration::from_secs(5);

/// Upper bound for the periodic requeue
const MAX_REQUEUE: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Rollout missing namespace")]
    MissingNamespace,

    #[error("Rollout missing name")]
    MissingName,

    #[error("ReplicaSet missing name in metadata")]
    ReplicaSetMissingName,

    #[error("Failed to serialize PodTemplateSpec: {0}")]
    SerializationError(String),

    #[error("Conflicting update: {0}")]
    Conflict(String),

    #[error("Object disappeared during reconciliation: {0}")]
    NotFound(String),

    #[error("Invalid Rollout spec: {0}")]
    InvalidConfiguration(String),

    #[error("Strategy planning failed: {0}")]
    StrategyError(#[from] crate::controller::strategies::StrategyError),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Api(e) => ReconcileError::KubeError(e),
            conflict @ StoreError::Conflict { .. } => ReconcileError::Conflict(conflict.to_string()),
            not_found @ StoreError::NotFound { .. } => {
                ReconcileError::NotFound(not_found.to_string())
            }
        }
    }
}

impl ReconcileError {
    /// `result` label for the reconciliation counter
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcileError::Conflict(_) => "conflict",
            ReconcileError::InvalidConfiguration(_) => "invalid",
            _ => "error",
        }
    }
}

pub struct Context {
    pub store: Arc<dyn RolloutStore>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub config: ControllerConfig,
    /// Optional controller metrics for Prometheus
    /// When Some, records reconciliation counts and durations
    pub metrics: Option<SharedMetrics>,
}

impl Context {
    /// Context backed by the Kubernetes API
    pub fn new(
        client: kube::Client,
        config: ControllerConfig,
        metrics: Option<SharedMetrics>,
    ) -> Self {
        Context {
            store: Arc::new(KubeStore::new(client.clone())),
            events: Arc::new(KubeEventSink::new(client, config.instance_id.clone())),
            clock: Arc::new(SystemClock),
            config,
            metrics,
        }
    }

    #[cfg(test)]
    pub fn new_mock(
        store: Arc<dyn RolloutStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Context {
            store,
            events,
            clock,
            config: ControllerConfig::default(),
            metrics: None,
        }
    }

    /// Publish an event; failures are logged, never fatal
    pub(crate) async fn publish(&self, rollout: &Rollout, event: RolloutEvent) {
        let reason = event.reason.clone();
        if let Err(e) = self.events.publish(rollout, event).await {
            warn!(
                rollout = ?rollout.name_any(),
                reason = %reason,
                error = %e,
                "Failed to publish event"
            );
        }
    }
}

/// Requeue interval for the next periodic reconcile
///
/// Uses the earliest pending scale-down deadline when it comes before the default
/// interval, clamped to 5s..300s.
pub fn calculate_requeue_interval(requeue_after: Option<Duration>, default: Duration) -> Duration {
    requeue_after
        .map_or(default, |d| d.min(default))
        .clamp(MIN_REQUEUE, MAX_REQUEUE)
}

/// Reconcile a Rollout resource
///
/// 1. Computes the pod template hash (salted with `collisionCount`)
/// 2. Lists owned ReplicaSets and makes sure the one for the hash exists
/// 3. Fetches the active and preview Services
/// 4. Plans the blue-green writes from that snapshot
/// 5. Publishes diagnostics as Warning events and applies the writes in order
///
/// # Arguments
/// * `rollout` - The Rollout resource to reconcile
/// * `ctx` - Controller context (store, events, clock, config, metrics)
///
/// # Returns
/// * `Ok(Action)` - Requeue action
/// * `Err(ReconcileError)` - Reconciliation error, handled by `error_policy`
pub async fn reconcile(rollout: Arc<Rollout>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let started = Instant::now();
    let result = reconcile_rollout(&rollout, &ctx).await;

    if let Some(metrics) = &ctx.metrics {
        metrics.observe_duration(started.elapsed().as_secs_f64());
        if result.is_ok() {
            metrics.record_reconciliation("success");
        }
    }

    result
}

async fn fetch_service(
    ctx: &Context,
    namespace: &str,
    name: &str,
) -> Result<Option<Service>, ReconcileError> {
    if name.is_empty() {
        return Ok(None);
    }
    Ok(ctx.store.get_service(namespace, name).await?)
}

async fn reconcile_rollout(rollout: &Rollout, ctx: &Context) -> Result<Action, ReconcileError> {
    let name = rollout
        .metadata
        .name
        .clone()
        .ok_or(ReconcileError::MissingName)?;
    let namespace = rollout.namespace().ok_or(ReconcileError::MissingNamespace)?;
    let now = ctx.clock.now();

    let collision_count = rollout.status.as_ref().and_then(|s| s.collision_count);
    let pod_hash = compute_pod_template_hash(&rollout.spec.template, collision_count)?;
    debug!(rollout = ?name, pod_hash = %pod_hash, "Reconciling rollout");

    let mut replica_sets = Vec::new();
    let mut active_service = None;
    let mut preview_service = None;

    // An invalid rollout only gets its status updated; nothing is created or fetched
    if validate_rollout(rollout).is_ok() {
        replica_sets = ctx
            .store
            .list_replica_sets(&namespace, &name)
            .await?
            .into_iter()
            .filter(|rs| is_owned_by(rs, rollout))
            .collect();

        match ensure_new_replicaset(ctx.store.as_ref(), rollout, &pod_hash, &mut replica_sets)
            .await?
        {
            NewReplicaSet::Created => {
                ctx.publish(
                    rollout,
                    RolloutEvent::normal(
                        "ReplicaSetCreated",
                        "CreateReplicaSet",
                        format!("Created ReplicaSet {name}-{pod_hash}"),
                    ),
                )
                .await;
            }
            NewReplicaSet::Retired => {
                let next = collision_count.unwrap_or(0) + 1;
                warn!(
                    rollout = ?name,
                    pod_hash = %pod_hash,
                    collision_count = next,
                    "ReplicaSet for current template was already retired, bumping collision count"
                );
                let patch = with_resource_version(
                    &rollout.metadata,
                    json!({ "status": { "collisionCount": next } }),
                );
                ctx.store
                    .patch_rollout_status(&namespace, &name, &patch)
                    .await?;
                return Ok(Action::requeue(ctx.config.conflict_requeue));
            }
            NewReplicaSet::Unchanged | NewReplicaSet::Scaled => {}
        }

        if let Some(bg) = &rollout.spec.strategy.blue_green {
            active_service = fetch_service(ctx, &namespace, &bg.active_service).await?;
            preview_service = fetch_service(ctx, &namespace, &bg.preview_service).await?;
        }
    }

    let plan = blue_green::plan(&Snapshot {
        rollout,
        replica_sets: &replica_sets,
        active_service: active_service.as_ref(),
        preview_service: preview_service.as_ref(),
        pod_hash: &pod_hash,
        now,
    })?;

    for diagnostic in &plan.diagnostics {
        warn!(rollout = ?name, reason = diagnostic.reason(), "{}", diagnostic);
        ctx.publish(
            rollout,
            RolloutEvent::warning(diagnostic.reason(), "Reconcile", diagnostic.to_string()),
        )
        .await;
    }

    apply_operations(ctx, rollout, &namespace, &plan.operations).await?;

    if let Some(reason) = plan.invalid_reason() {
        return Err(ReconcileError::InvalidConfiguration(reason.to_string()));
    }

    let requeue = calculate_requeue_interval(plan.requeue_after, ctx.config.requeue_interval);
    info!(
        rollout = ?name,
        operations = plan.operations.len(),
        promotion = ?plan.promotion,
        requeue_secs = requeue.as_secs(),
        "Rollout reconciled"
    );
    Ok(Action::requeue(requeue))
}

/// Error policy for the controller
///
/// Conflicts requeue quickly so the next attempt works from a fresh snapshot;
/// everything else waits the error interval. Uses `warn!` since reconciliation
/// errors are expected and trigger retries.
pub fn error_policy(rollout: Arc<Rollout>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    warn!(rollout = ?rollout.name_any(), error = %error, "Reconcile error (will retry)");

    if let Some(metrics) = &ctx.metrics {
        metrics.record_reconciliation(error.metric_label());
    }

    match error {
        ReconcileError::Conflict(_) | ReconcileError::NotFound(_) => {
            Action::requeue(ctx.config.conflict_requeue)
        }
        _ => Action::requeue(ctx.config.error_requeue),
    }
}
