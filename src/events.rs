//! Kubernetes Event recording.
//!
//! Events are fire-and-forget: a failed publish is logged and dropped so it
//! can never break a reconcile pass.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

/// Publishes Events on behalf of the reconcilers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Attach an event to `resource_ref`. Never fails.
    async fn publish(&self, resource_ref: &ObjectReference, type_: EventType, reason: &str, note: String);
}

/// Publisher backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// `controller_name` shows up as the reporting component of each Event.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, resource_ref: &ObjectReference, type_: EventType, reason: &str, note: String) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(note),
            action: actions::RECONCILE.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`.
pub mod reasons {
    /// The referenced VerticaDB does not exist
    pub const VERTICADB_NOT_FOUND: &str = "VerticaDBNotFound";
    /// No subcluster is bound to the autoscaler's service name
    pub const SUBCLUSTER_SERVICE_NAME_NOT_FOUND: &str = "SubclusterServiceNameNotFound";
    /// Growth impossible: empty template and nothing to clone
    pub const NO_SUBCLUSTER_TEMPLATE: &str = "NoSubclusterTemplate";
    /// A subcluster was added by the autoscaler
    pub const SUBCLUSTER_ADDED: &str = "SubclusterAdded";
    /// A subcluster was removed by the autoscaler
    pub const SUBCLUSTER_REMOVED: &str = "SubclusterRemoved";
    /// Pod counts of existing subclusters changed
    pub const SUBCLUSTER_RESIZED: &str = "SubclusterResized";
    /// A Prometheus trigger's credentials secret is missing
    pub const AUTH_SECRET_NOT_FOUND: &str = "AuthSecretNotFound";
}

pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
}
