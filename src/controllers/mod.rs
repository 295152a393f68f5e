//! Reconcilers for VerticaAutoscaler
//!
//! A reconcile pass runs a fixed chain of steps. Each step either lets the
//! chain continue or asks for the whole chain to be re-run after a delay;
//! an error ends the pass.

mod autoscaler;
mod refresh;
mod scale_down;
mod scaler_object;
mod subcluster_resize;
mod subcluster_scale;
mod target_size;
mod verify;
mod verify_db;

pub use autoscaler::{error_policy, reconcile, AutoscalerController};
pub use scale_down::compute_min_replicas;
pub use scaler_object::{merge_managed_fields, merge_patch, validate_secret_keys, PreservedField};
pub use subcluster_resize::{resize_subclusters, ResizeOutcome};
pub use subcluster_scale::{next_subcluster_name, scale_subclusters, ScaleOutcome};
pub use verify::{evaluate_backend, BackendReport, ScalerState};

use crate::client::ControlPlane;
use crate::config::OperatorConfig;
use crate::crd::VerticaAutoscaler;
use crate::error::Result;
use crate::events::EventPublisher;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use kube::Resource;
use std::sync::Arc;
use std::time::Duration;

/// Shared dependencies handed to every step.
pub struct Context {
    pub client: Arc<dyn ControlPlane>,
    pub events: Arc<dyn EventPublisher>,
    pub config: OperatorConfig,
}

impl Context {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        events: Arc<dyn EventPublisher>,
        config: OperatorConfig,
    ) -> Self {
        Self {
            client,
            events,
            config,
        }
    }

    pub(crate) async fn warn(&self, vas: &VerticaAutoscaler, reason: &str, note: String) {
        self.events
            .publish(&object_ref(vas), EventType::Warning, reason, note)
            .await;
    }

    pub(crate) async fn normal(&self, vas: &VerticaAutoscaler, reason: &str, note: String) {
        self.events
            .publish(&object_ref(vas), EventType::Normal, reason, note)
            .await;
    }

    pub(crate) fn requeue(&self) -> StepOutcome {
        StepOutcome::Requeue(self.config.requeue_delay)
    }
}

fn object_ref(vas: &VerticaAutoscaler) -> ObjectReference {
    vas.object_ref(&())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    Requeue(Duration),
}

/// One link of the reconcile chain.
///
/// Steps may refresh `vas` in place with what the API server returned after
/// a write, so later steps see the new spec and status.
#[async_trait]
pub trait ReconcileStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::client::MockControlPlane;
    use crate::crd::{
        CustomAutoscalerSpec, CustomAutoscalerType, HpaConfig, MetricDefinition, Subcluster,
        SubclusterType, VerticaAutoscalerSpec, VerticaAutoscalerStatus, VerticaDB, VerticaDBSpec,
    };
    use crate::events::MockEventPublisher;
    use crate::retry::RetryConfig;
    use k8s_openapi::api::autoscaling::v2::{MetricSpec, MetricTarget, ResourceMetricSource};

    pub const NS: &str = "default";

    pub fn context(client: MockControlPlane, events: MockEventPublisher) -> Context {
        let config = OperatorConfig {
            retry: RetryConfig {
                steps: 3,
                initial_delay: Duration::from_millis(1),
                factor: 1.0,
                jitter: 0.0,
            },
            ..Default::default()
        };
        Context::new(Arc::new(client), Arc::new(events), config)
    }

    /// Event publisher that accepts anything.
    pub fn quiet_events() -> MockEventPublisher {
        let mut events = MockEventPublisher::new();
        events.expect_publish().returning(|_, _, _, _| ());
        events
    }

    pub fn subcluster(name: &str, svc: &str, size: i32, r#type: SubclusterType) -> Subcluster {
        Subcluster {
            name: name.to_string(),
            service_name: svc.to_string(),
            size,
            r#type,
            ..Default::default()
        }
    }

    pub fn vdb(subclusters: Vec<Subcluster>) -> VerticaDB {
        let mut vdb = VerticaDB::new(
            "vdb",
            VerticaDBSpec {
                subclusters,
                ..Default::default()
            },
        );
        vdb.metadata.namespace = Some(NS.to_string());
        vdb.metadata.resource_version = Some("1".to_string());
        vdb
    }

    pub fn vas(service: &str, target_size: i32) -> VerticaAutoscaler {
        let mut vas = VerticaAutoscaler::new(
            "vas",
            VerticaAutoscalerSpec {
                vertica_db_name: "vdb".to_string(),
                service_name: service.to_string(),
                target_size,
                ..Default::default()
            },
        );
        vas.metadata.namespace = Some(NS.to_string());
        vas.metadata.resource_version = Some("1".to_string());
        vas
    }

    /// Autoscaler whose TargetSizeInitialized condition is already true.
    pub fn initialized_vas(service: &str, target_size: i32) -> VerticaAutoscaler {
        let mut v = vas(service, target_size);
        let mut status = VerticaAutoscalerStatus::default();
        crate::conditions::set_condition(
            &mut status.conditions,
            crate::conditions::ConditionType::TargetSizeInitialized,
            crate::conditions::build_condition(
                crate::conditions::ConditionType::TargetSizeInitialized,
                crate::conditions::CONDITION_TRUE,
            ),
        );
        v.status = Some(status);
        v
    }

    pub fn cpu_metric(name: &str, threshold: Option<i32>) -> MetricDefinition {
        MetricDefinition {
            scale_in_threshold: threshold.map(|t| MetricTarget {
                type_: "Utilization".to_string(),
                average_utilization: Some(t),
                ..Default::default()
            }),
            metric: MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: name.to_string(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(70),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            },
        }
    }

    pub fn hpa_vas(metrics: Vec<MetricDefinition>) -> VerticaAutoscaler {
        let mut v = initialized_vas("s", 3);
        v.spec.custom_autoscaler = Some(CustomAutoscalerSpec {
            r#type: CustomAutoscalerType::Hpa,
            hpa: Some(HpaConfig {
                min_replicas: 3,
                max_replicas: 12,
                metrics,
                behavior: None,
            }),
            scaled_object: None,
        });
        v
    }

    /// Status writes echo back what was sent.
    pub fn echo_status_writes(client: &mut MockControlPlane, current: VerticaAutoscaler) {
        client
            .expect_get_autoscaler()
            .returning(move |_, _| Ok(current.clone()));
        client
            .expect_replace_autoscaler_status()
            .returning(|v| Ok(v.clone()));
    }
}
