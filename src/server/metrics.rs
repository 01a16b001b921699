//! Prometheus metrics for the controller
//!
//! - `kulta_reconciliations_total{result}` - success, conflict, invalid, error
//! - `kulta_reconciliation_duration_seconds` - wall time of one reconcile
//! - `kulta_operations_applied_total{kind}` - writes applied, by operation kind
//! - `kulta_promotions_total` - active service switches

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

pub type SharedMetrics = Arc<ControllerMetrics>;

pub struct ControllerMetrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconciliation_duration: Histogram,
    operations_applied: IntCounterVec,
    promotions: IntCounter,
}

impl ControllerMetrics {
    /// Register all controller metrics on a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "kulta_reconciliations_total",
                "Reconciliations by result",
            ),
            &["result"],
        )?;
        let reconciliation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "kulta_reconciliation_duration_seconds",
                "Time spent reconciling one rollout",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        let operations_applied = IntCounterVec::new(
            Opts::new(
                "kulta_operations_applied_total",
                "Writes applied to the cluster by operation kind",
            ),
            &["kind"],
        )?;
        let promotions = IntCounter::new(
            "kulta_promotions_total",
            "Active service switches to a new ReplicaSet",
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconciliation_duration.clone()))?;
        registry.register(Box::new(operations_applied.clone()))?;
        registry.register(Box::new(promotions.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconciliation_duration,
            operations_applied,
            promotions,
        })
    }

    pub fn record_reconciliation(&self, result: &str) {
        self.reconciliations.with_label_values(&[result]).inc();
    }

    pub fn observe_duration(&self, seconds: f64) {
        self.reconciliation_duration.observe(seconds);
    }

    pub fn record_operation(&self, kind: &str) {
        self.operations_applied.with_label_values(&[kind]).inc();
    }

    pub fn record_promotion(&self) {
        self.promotions.inc();
    }

    /// Render every registered metric in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Create the shared metrics registry
pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ControllerMetrics::new()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_recorded_series() {
        let metrics = create_metrics().unwrap();
        metrics.record_reconciliation("success");
        metrics.record_operation("patch_service_selector");
        metrics.record_promotion();
        metrics.observe_duration(0.02);

        let text = metrics.encode().unwrap();

        assert!(text.contains(r#"kulta_reconciliations_total{result="success"} 1"#));
        assert!(text.contains(r#"kulta_operations_applied_total{kind="patch_service_selector"} 1"#));
        assert!(text.contains("kulta_promotions_total 1"));
        assert!(text.contains("kulta_reconciliation_duration_seconds_count 1"));
    }

    #[test]
    fn test_separate_registries_do_not_collide() {
        let a = create_metrics().unwrap();
        let b = create_metrics().unwrap();
        a.record_promotion();
        assert!(b.encode().unwrap().contains("kulta_promotions_total 0"));
    }
}
