//! Scale-down gate.
//!
//! When metrics carry a scale-in threshold, the backend's floor is moved at
//! runtime: it follows the current size while any gated metric is at or
//! above its threshold and drops back to the configured minimum otherwise.
//! The HPA can therefore only shrink the database once load has fallen.
//! For a ScaledObject the metrics are read from the HPA KEDA runs for it and
//! the floor written is `minReplicaCount`.

use super::{Context, ReconcileStep, StepOutcome};
use crate::crd::{ScaleTrigger, ScaledObject, VerticaAutoscaler};
use crate::error::{OperatorError, Result};
use crate::metric::{compare, spec_metric_name, Comparison, ReportedMetric};
use crate::names;
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::{HorizontalPodAutoscaler, MetricStatus, MetricTarget};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

fn scale_in_threshold<'a>(vas: &'a VerticaAutoscaler, metric_name: &str) -> Option<&'a MetricTarget> {
    vas.hpa_config()?
        .metrics
        .iter()
        .find(|m| spec_metric_name(&m.metric) == Some(metric_name))
        .and_then(|m| m.scale_in_threshold.as_ref())
}

/// KEDA publishes trigger `i` of a ScaledObject as external metric `s<i>-<name>`.
fn keda_trigger_index(metric_name: &str) -> Option<usize> {
    let (index, _) = metric_name.strip_prefix('s')?.split_once('-')?;
    index.parse().ok()
}

/// Scale-in threshold of a trigger in the representation KEDA reports it.
fn trigger_threshold(trigger: &ScaleTrigger) -> Option<MetricTarget> {
    let quantity = Some(Quantity(trigger.scale_in_threshold()?.to_string()));
    Some(match trigger.metric_type.as_deref() {
        Some("Value") => MetricTarget {
            type_: "Value".to_string(),
            value: quantity,
            ..Default::default()
        },
        _ => MetricTarget {
            type_: "AverageValue".to_string(),
            average_value: quantity,
            ..Default::default()
        },
    })
}

fn reported_metrics(hpa: &HorizontalPodAutoscaler) -> &[MetricStatus] {
    hpa.status
        .as_ref()
        .and_then(|s| s.current_metrics.as_deref())
        .unwrap_or_default()
}

/// Bounds the gate works within.
struct Floor {
    current: i32,
    static_min: i32,
    current_size: i32,
    max: i32,
}

/// Reported metrics are walked in order. A gated metric below its threshold
/// proposes the static minimum; the first one at or above it pins the floor
/// to the current size and ends the walk. With no gated metric reported the
/// present floor stays.
fn gate_floor<F>(reported: &[MetricStatus], threshold: F, floor: Floor) -> Result<i32>
where
    F: Fn(&str) -> Option<MetricTarget>,
{
    let mut candidate = floor.current;
    for metric in reported.iter().filter_map(ReportedMetric::from_status) {
        let Some(target) = threshold(metric.name()) else {
            continue;
        };
        match compare(metric.current(), &target) {
            Comparison::CannotCompare => {
                return Err(OperatorError::inconsistency(format!(
                    "cannot compare metric {} with its scale-in threshold",
                    metric.name()
                )));
            }
            Comparison::Below => candidate = floor.static_min,
            Comparison::Equal | Comparison::Above => {
                candidate = floor.current_size;
                break;
            }
        }
    }
    Ok(candidate.max(1).min(floor.max.max(1)))
}

/// Floor the HPA should have given its reported metrics.
pub fn compute_min_replicas(vas: &VerticaAutoscaler, hpa: &HorizontalPodAutoscaler) -> Result<i32> {
    let spec = hpa.spec.as_ref();
    let current = spec.and_then(|s| s.min_replicas).unwrap_or(1);
    let floor = Floor {
        current,
        static_min: vas.static_min_replicas().unwrap_or(1),
        current_size: vas.current_size(),
        max: spec.map(|s| s.max_replicas).unwrap_or(current),
    };
    gate_floor(
        reported_metrics(hpa),
        |name| scale_in_threshold(vas, name).cloned(),
        floor,
    )
}

/// `minReplicaCount` a ScaledObject should have given what the HPA KEDA
/// manages for it reports. Only Prometheus triggers with a scale-in
/// threshold take part.
pub fn compute_min_replica_count(
    vas: &VerticaAutoscaler,
    so: &ScaledObject,
    keda_hpa: &HorizontalPodAutoscaler,
) -> Result<i32> {
    let triggers = vas
        .scaled_object_config()
        .map(|cfg| cfg.metrics.as_slice())
        .unwrap_or_default();
    let current = so.spec.min_replica_count.unwrap_or(1);
    let floor = Floor {
        current,
        static_min: vas.static_min_replicas().unwrap_or(1),
        current_size: vas.current_size(),
        max: so.spec.max_replica_count.unwrap_or(current),
    };
    gate_floor(
        reported_metrics(keda_hpa),
        |name| {
            keda_trigger_index(name)
                .and_then(|i| triggers.get(i))
                .and_then(trigger_threshold)
        },
        floor,
    )
}

pub(super) struct ScaleDownGate;

impl ScaleDownGate {
    async fn gate_hpa(&self, ctx: &Context, vas: &VerticaAutoscaler) -> Result<StepOutcome> {
        let ns = vas.namespace().unwrap_or_default();
        let hpa_name = names::hpa_name(vas);
        let hpa = match ctx.client.get_hpa(&ns, &hpa_name).await {
            Ok(hpa) => hpa,
            Err(e) if e.is_not_found() => return Ok(ctx.requeue()),
            Err(e) => return Err(e),
        };

        let current_min = hpa.spec.as_ref().and_then(|s| s.min_replicas);
        let new_min = compute_min_replicas(vas, &hpa)?;
        if current_min == Some(new_min) {
            debug!(namespace = %ns, hpa = %hpa_name, min_replicas = new_min, "HPA floor unchanged");
            return Ok(StepOutcome::Continue);
        }

        let patch = json!({ "spec": { "minReplicas": new_min } });
        ctx.client.patch_hpa(&ns, &hpa_name, &patch).await?;
        info!(
            namespace = %ns,
            hpa = %hpa_name,
            old_min_replicas = ?current_min,
            min_replicas = new_min,
            "Updated HPA minReplicas"
        );
        Ok(StepOutcome::Continue)
    }

    async fn gate_scaled_object(&self, ctx: &Context, vas: &VerticaAutoscaler) -> Result<StepOutcome> {
        let ns = vas.namespace().unwrap_or_default();
        let so_name = names::scaled_object_name(vas);
        let so = match ctx.client.get_scaled_object(&ns, &so_name).await {
            Ok(so) => so,
            Err(e) if e.is_not_found() => return Ok(ctx.requeue()),
            Err(e) => return Err(e),
        };
        let hpa_name = names::keda_hpa_name(&so);
        let keda_hpa = match ctx.client.get_hpa(&ns, &hpa_name).await {
            Ok(hpa) => hpa,
            Err(e) if e.is_not_found() => {
                debug!(namespace = %ns, hpa = %hpa_name, "KEDA has not created its HPA yet");
                return Ok(ctx.requeue());
            }
            Err(e) => return Err(e),
        };

        let current_min = so.spec.min_replica_count;
        let new_min = compute_min_replica_count(vas, &so, &keda_hpa)?;
        if current_min == Some(new_min) {
            debug!(namespace = %ns, name = %so_name, min_replica_count = new_min, "ScaledObject floor unchanged");
            return Ok(StepOutcome::Continue);
        }

        let patch = json!({ "spec": { "minReplicaCount": new_min } });
        ctx.client.patch_scaled_object(&ns, &so_name, &patch).await?;
        info!(
            namespace = %ns,
            name = %so_name,
            old_min_replica_count = ?current_min,
            min_replica_count = new_min,
            "Updated ScaledObject minReplicaCount"
        );
        Ok(StepOutcome::Continue)
    }
}

#[async_trait]
impl ReconcileStep for ScaleDownGate {
    fn name(&self) -> &'static str {
        "scale-down-gate"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        if !vas.has_scale_down_threshold() {
            return Ok(StepOutcome::Continue);
        }
        if vas.is_hpa_enabled() {
            self.gate_hpa(ctx, vas).await
        } else {
            self.gate_scaled_object(ctx, vas).await
        }
    }
}
