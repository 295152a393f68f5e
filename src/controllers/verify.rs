//! Waits for the external scaler to report live metrics before any sizing
//! decision is taken on its behalf.

use super::{Context, ReconcileStep, StepOutcome};
use crate::conditions::{ConditionType, CONDITION_TRUE};
use crate::crd::{ScaledObject, VerticaAutoscaler};
use crate::error::Result;
use crate::names;
use crate::status::update_condition;
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use kube::ResourceExt;
use tracing::{debug, info};

const HPA_SCALING_ACTIVE: &str = "ScalingActive";

/// What a backend object says about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendReport {
    pub scaling_active: bool,
    /// Number of metrics with a current value, when the backend exposes it
    pub reported_metrics: Option<usize>,
}

impl BackendReport {
    pub fn from_hpa(hpa: &HorizontalPodAutoscaler) -> Self {
        let status = hpa.status.as_ref();
        let scaling_active = status
            .and_then(|s| s.conditions.as_ref())
            .map(|conds| {
                conds
                    .iter()
                    .any(|c| c.type_ == HPA_SCALING_ACTIVE && c.status == CONDITION_TRUE)
            })
            .unwrap_or(false);
        let reported_metrics = status
            .and_then(|s| s.current_metrics.as_ref())
            .map(Vec::len)
            .unwrap_or(0);
        Self {
            scaling_active,
            reported_metrics: Some(reported_metrics),
        }
    }

    /// KEDA lists metric names rather than values; an empty list means the
    /// count is not available yet and is not checked.
    pub fn from_scaled_object(so: &ScaledObject) -> Self {
        let reported = so
            .status
            .as_ref()
            .map(|s| s.external_metric_names.len() + s.resource_metric_names.len())
            .unwrap_or(0);
        Self {
            scaling_active: so.is_ready(),
            reported_metrics: (reported > 0).then_some(reported),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalerState {
    #[default]
    Inactive,
    Active,
}

/// Active only when the backend says so and every configured metric is
/// being reported.
pub fn evaluate_backend(report: &BackendReport, configured_metrics: usize) -> ScalerState {
    let counts_match = report
        .reported_metrics
        .map_or(true, |n| n == configured_metrics);
    if report.scaling_active && counts_match {
        ScalerState::Active
    } else {
        ScalerState::Inactive
    }
}

pub(super) struct ScaleVerifier;

impl ScaleVerifier {
    async fn fetch_report(&self, ctx: &Context, vas: &VerticaAutoscaler) -> Result<Option<BackendReport>> {
        let ns = vas.namespace().unwrap_or_default();
        let fetched = if vas.is_hpa_enabled() {
            ctx.client
                .get_hpa(&ns, &names::hpa_name(vas))
                .await
                .map(|hpa| BackendReport::from_hpa(&hpa))
        } else {
            ctx.client
                .get_scaled_object(&ns, &names::scaled_object_name(vas))
                .await
                .map(|so| BackendReport::from_scaled_object(&so))
        };
        match fetched {
            Ok(report) => Ok(Some(report)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ReconcileStep for ScaleVerifier {
    fn name(&self) -> &'static str {
        "verify-scaler"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        if !vas.is_custom_metrics_enabled() {
            return Ok(StepOutcome::Continue);
        }

        let Some(report) = self.fetch_report(ctx, vas).await? else {
            debug!(name = %vas.name_any(), "Scaler object not found yet");
            return Ok(ctx.requeue());
        };

        let configured = vas.configured_metric_count();
        match evaluate_backend(&report, configured) {
            ScalerState::Active => {
                update_condition(ctx, vas, ConditionType::ScalingActive, CONDITION_TRUE).await?;
                Ok(StepOutcome::Continue)
            }
            ScalerState::Inactive => {
                info!(
                    name = %vas.name_any(),
                    scaling_active = report.scaling_active,
                    reported_metrics = ?report.reported_metrics,
                    configured_metrics = configured,
                    "Scaler not active yet, requeueing"
                );
                Ok(ctx.requeue())
            }
        }
    }
}
