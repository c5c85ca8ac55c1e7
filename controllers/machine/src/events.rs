//! Kubernetes Event recording for machines.
//!
//! Events are fire-and-forget: a failed event is logged and never fails the
//! operation that produced it.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Default reporting component of machine events
pub const DEFAULT_REPORTER: &str = "libvirt-machine-controller";

/// Sink for machine events
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event about `machine`
    async fn publish(&self, machine: &ObjectReference, type_: EventType, reason: &str, action: &str, note: String);
}

/// Event sink backed by `kube::runtime::events::Recorder`
pub struct KubeEventSink {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventSink").finish_non_exhaustive()
    }
}

impl KubeEventSink {
    /// Sink reporting as `controller_name`
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, machine: &ObjectReference, type_: EventType, reason: &str, action: &str, note: String) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, machine).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons
pub mod reasons {
    /// Machine creation failed
    pub const FAILED_CREATE: &str = "FailedCreate";
    /// Machine created
    pub const CREATED: &str = "Created";
    /// Machine deletion failed
    pub const FAILED_DELETE: &str = "FailedDelete";
    /// Machine deleted
    pub const DELETED: &str = "Deleted";
}

/// Event actions
pub mod actions {
    /// Create operation
    pub const CREATE: &str = "Create";
    /// Delete operation
    pub const DELETE: &str = "Delete";
    /// Status refresh of an existing machine
    pub const UPDATE: &str = "Update";
}
