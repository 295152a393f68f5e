//! VerticaAutoscaler controller
//!
//! Watches VerticaAutoscaler objects, and the HPAs they own, and runs the
//! reconcile chain for each of them.

use super::refresh::{RefreshCurrentSize, RefreshSelector};
use super::scale_down::ScaleDownGate;
use super::scaler_object::ScalerObjectReconciler;
use super::subcluster_resize::SubclusterResize;
use super::subcluster_scale::SubclusterScale;
use super::target_size::TargetSizeInitializer;
use super::verify::ScaleVerifier;
use super::verify_db::VerifyDatabase;
use super::{Context, ReconcileStep, StepOutcome};
use crate::client::KubeControlPlane;
use crate::config::OperatorConfig;
use crate::crd::VerticaAutoscaler;
use crate::error::{OperatorError, Result};
use crate::events::KubeEventPublisher;
use crate::names::OPERATOR_NAME;
use futures::StreamExt;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Steps in the order they run.
const STEPS: &[&dyn ReconcileStep] = &[
    &VerifyDatabase,
    &TargetSizeInitializer,
    &RefreshCurrentSize,
    &RefreshSelector,
    &ScalerObjectReconciler,
    &ScaleVerifier,
    &ScaleDownGate,
    &SubclusterResize,
    &SubclusterScale,
];

pub struct AutoscalerController {
    client: Client,
    config: OperatorConfig,
}

impl AutoscalerController {
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self { client, config }
    }

    /// Run the controller until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        let (autoscalers, hpas): (Api<VerticaAutoscaler>, Api<HorizontalPodAutoscaler>) =
            match self.config.namespace.as_deref() {
                Some(ns) => (
                    Api::namespaced(self.client.clone(), ns),
                    Api::namespaced(self.client.clone(), ns),
                ),
                None => (Api::all(self.client.clone()), Api::all(self.client.clone())),
            };

        let ctx = Arc::new(Context::new(
            Arc::new(KubeControlPlane::new(self.client.clone())),
            Arc::new(KubeEventPublisher::new(self.client.clone(), OPERATOR_NAME)),
            self.config,
        ));

        info!(namespace = ?ctx.config.namespace, "Starting VerticaAutoscaler controller");

        Controller::new(autoscalers, Config::default())
            .owns(hpas, Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, ctx)
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => {
                        debug!(namespace = ?obj.namespace, name = %obj.name, "Reconciled autoscaler");
                    }
                    Err(e) => {
                        warn!(error = %e, "Reconciliation failed");
                    }
                }
            })
            .await;

        info!("VerticaAutoscaler controller stopped");
        Ok(())
    }
}

/// One reconcile pass over a VerticaAutoscaler.
pub async fn reconcile(vas: Arc<VerticaAutoscaler>, ctx: Arc<Context>) -> Result<Action> {
    let span = info_span!(
        "reconcile",
        namespace = %vas.namespace().unwrap_or_default(),
        name = %vas.name_any()
    );
    run_steps(&ctx, (*vas).clone()).instrument(span).await
}

async fn run_steps(ctx: &Context, mut vas: VerticaAutoscaler) -> Result<Action> {
    for step in STEPS {
        let outcome = step.reconcile(ctx, &mut vas).await.map_err(|e| {
            debug!(step = step.name(), error = %e, "Step failed");
            e
        })?;
        if let StepOutcome::Requeue(after) = outcome {
            debug!(step = step.name(), requeue_after = ?after, "Step requested requeue");
            return Ok(Action::requeue(after));
        }
    }

    if vas.is_custom_metrics_enabled() {
        Ok(Action::requeue(ctx.config.resync_interval))
    } else {
        Ok(Action::await_change())
    }
}

pub fn error_policy(vas: Arc<VerticaAutoscaler>, error: &OperatorError, ctx: Arc<Context>) -> Action {
    error!(
        namespace = ?vas.namespace(),
        name = %vas.name_any(),
        error = %error,
        "Reconciliation error"
    );
    Action::requeue(ctx.config.error_requeue)
}
