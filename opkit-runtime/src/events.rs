//! Kubernetes events recorded against a workload when its children change.
//!
//! Events are fire-and-forget: a failure to publish is logged and never fails the
//! reconcile.
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{
    core::DynamicObject,
    runtime::events::{Event, EventType, Recorder, Reporter},
    Client,
};
use opkit_core::identity::message_for;
use parking_lot::Mutex;
use std::fmt;
use tracing::warn;

/// Something that happened to a child resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceEvent {
    /// The child was created
    Created,
    /// The child was patched to match the desired state
    Updated,
    /// The child was deleted
    Deleted,
}

impl ResourceEvent {
    /// The reason shown in `kubectl get events`
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            ResourceEvent::Created => "Created",
            ResourceEvent::Updated => "Updated",
            ResourceEvent::Deleted => "Deleted",
        }
    }

    /// Build the event recorded against `parent` for something that happened to `child`
    ///
    /// `parent` is the `Kind/name` of the workload.
    #[must_use]
    pub fn for_child(self, child: &DynamicObject, parent: &str) -> Event {
        Event {
            type_: EventType::Normal,
            reason: self.reason().into(),
            note: Some(format!(
                "{} child resource '{}' managed by parent resource '{}'",
                self.reason(),
                message_for(child),
                parent
            )),
            action: self.reason().into(),
            secondary: None,
        }
    }
}

impl fmt::Display for ResourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Publishes events about a workload
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event` against the object behind `reference`
    ///
    /// Never fails; implementations log publishing errors instead.
    async fn publish(&self, reference: &ObjectReference, event: Event);
}

/// Publishes through [`kube::runtime::events::Recorder`]
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller`
    #[must_use]
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.into(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, reference: &ObjectReference, event: Event) {
        if let Err(err) = self.recorder.publish(&event, reference).await {
            warn!(
                reason = %event.reason,
                object = reference.name.as_deref().unwrap_or_default(),
                error = %err,
                "failed to publish event"
            );
        }
    }
}

/// Drops every event
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _reference: &ObjectReference, _event: Event) {}
}

/// An event captured by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Name of the object the event was recorded against
    pub object: String,
    /// Event reason
    pub reason: String,
    /// Event message
    pub note: String,
}

/// Keeps every event in memory, for operator tests
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Every event published so far
    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, reference: &ObjectReference, event: Event) {
        self.events.lock().push(RecordedEvent {
            object: reference.name.clone().unwrap_or_default(),
            reason: event.reason,
            note: event.note.unwrap_or_default(),
        });
    }
}
