//! Kubernetes Event emission for rollout observability
//!
//! Diagnostics, promotions and scale-down intents are published as Events on the
//! Rollout so `kubectl describe rollout` tells the story of a release.

use crate::crd::rollout::Rollout;
use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Resource;
use thiserror::Error;

pub const CONTROLLER_NAME: &str = "kulta-bluegreen";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to publish event: {0}")]
    Publish(#[from] kube::Error),
}

/// Severity of a rollout event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// A single event about a Rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutEvent {
    pub kind: EventKind,
    /// CamelCase reason, e.g. "Promoted"
    pub reason: String,
    /// What the controller did, e.g. "PatchService"
    pub action: String,
    pub note: String,
}

impl RolloutEvent {
    pub fn normal(reason: &str, action: &str, note: impl Into<String>) -> Self {
        RolloutEvent {
            kind: EventKind::Normal,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }

    pub fn warning(reason: &str, action: &str, note: impl Into<String>) -> Self {
        RolloutEvent {
            kind: EventKind::Warning,
            reason: reason.to_string(),
            action: action.to_string(),
            note: note.into(),
        }
    }
}

/// Trait for publishing rollout events
///
/// Production code uses `KubeEventSink` which writes `events.k8s.io/v1` Events.
/// Tests use `MockEventSink` which stores events in memory for assertions.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, rollout: &Rollout, event: RolloutEvent) -> Result<(), EventError>;
}

/// Event sink backed by the kube-runtime event recorder
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    /// # Arguments
    /// * `client` - Kubernetes client
    /// * `instance` - Reporting instance (usually the pod name)
    pub fn new(client: kube::Client, instance: Option<String>) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance,
        };
        KubeEventSink {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, rollout: &Rollout, event: RolloutEvent) -> Result<(), EventError> {
        let type_ = match event.kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        };
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: event.reason,
                    note: Some(event.note),
                    action: event.action,
                    secondary: None,
                },
                &rollout.object_ref(&()),
            )
            .await?;
        Ok(())
    }
}

/// Mock event sink for testing - stores events in memory
#[cfg(test)]
#[derive(Default, Clone)]
pub struct MockEventSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<RolloutEvent>>>,
}

#[cfg(test)]
impl MockEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)]
    pub fn get_emitted_events(&self) -> Vec<RolloutEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.get_emitted_events()
            .into_iter()
            .map(|e| e.reason)
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for MockEventSink {
    async fn publish(&self, _rollout: &Rollout, event: RolloutEvent) -> Result<(), EventError> {
        #[allow(clippy::unwrap_used)]
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
