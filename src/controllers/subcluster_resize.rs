//! Pod granularity: reach the target size by changing the size of the
//! subclusters already bound to the service.

use super::subcluster_scale::ignores_target;
use super::{Context, ReconcileStep, StepOutcome};
use crate::crd::{ScalingGranularity, VerticaAutoscaler, VerticaDB};
use crate::error::Result;
use crate::events::reasons;
use crate::retry::retry_on_conflict;
use crate::status::report_scaling_operation;
use async_trait::async_trait;
use kube::ResourceExt;
use std::cmp::Ordering;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResizeOutcome {
    Unchanged,
    /// `(subcluster, old size, new size)` for each subcluster touched
    Resized { changes: Vec<(String, i32, i32)> },
    /// Nothing is bound to the service
    NoSubclusters,
}

/// Spread the difference between target and current size over the
/// subclusters bound to the service. Mutates `vdb` in place.
///
/// Growth lands on the last bound subcluster. Shrinking walks backward
/// from it, emptying each subcluster before moving on, but primaries only
/// give up pods while the primary host count stays at or above the
/// k-safety floor.
pub fn resize_subclusters(vdb: &mut VerticaDB, vas: &VerticaAutoscaler) -> ResizeOutcome {
    let (indices, current) = vdb.find_subclusters_for_service(&vas.spec.service_name);
    let Some(&last) = indices.last() else {
        return ResizeOutcome::NoSubclusters;
    };

    let delta = vas.spec.target_size.saturating_sub(current);
    let mut changes = Vec::new();
    match delta.cmp(&0) {
        Ordering::Equal => {}
        Ordering::Greater => {
            let sc = &mut vdb.spec.subclusters[last];
            let grown = sc.size.saturating_add(delta);
            changes.push((sc.name.clone(), sc.size, grown));
            sc.size = grown;
        }
        Ordering::Less => {
            let mut to_remove = delta.saturating_neg();
            let mut primary_headroom = vdb.primary_count().saturating_sub(vdb.min_primary_hosts()).max(0);
            for &i in indices.iter().rev() {
                if to_remove == 0 {
                    break;
                }
                let sc = &mut vdb.spec.subclusters[i];
                let mut take = sc.size.min(to_remove);
                if sc.is_primary() {
                    take = take.min(primary_headroom);
                    primary_headroom -= take;
                }
                if take == 0 {
                    continue;
                }
                changes.push((sc.name.clone(), sc.size, sc.size - take));
                sc.size -= take;
                to_remove -= take;
            }
        }
    }

    if changes.is_empty() {
        ResizeOutcome::Unchanged
    } else {
        ResizeOutcome::Resized { changes }
    }
}

pub(super) struct SubclusterResize;

#[async_trait]
impl ReconcileStep for SubclusterResize {
    fn name(&self) -> &'static str {
        "subcluster-resize"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        if vas.spec.scaling_granularity != ScalingGranularity::Pod || ignores_target(vas) {
            return Ok(StepOutcome::Continue);
        }

        let ns = vas.namespace().unwrap_or_default();
        let ns = ns.as_str();
        let client = ctx.client.as_ref();
        let policy: &VerticaAutoscaler = vas;
        let (outcome, new_size) = retry_on_conflict(&ctx.config.retry, "resize subclusters", || async move {
            let mut vdb = client.get_verticadb(ns, &policy.spec.vertica_db_name).await?;
            let outcome = resize_subclusters(&mut vdb, policy);
            if matches!(outcome, ResizeOutcome::Resized { .. }) {
                vdb = client.replace_verticadb(&vdb).await?;
            }
            let (_, size) = vdb.find_subclusters_for_service(&policy.spec.service_name);
            Ok((outcome, size))
        })
        .await?;

        match outcome {
            ResizeOutcome::Unchanged => Ok(StepOutcome::Continue),
            ResizeOutcome::NoSubclusters => {
                let service = vas.spec.service_name.clone();
                info!(namespace = ns, service = %service, "No subcluster bound to service, requeueing");
                ctx.warn(
                    vas,
                    reasons::SUBCLUSTER_SERVICE_NAME_NOT_FOUND,
                    format!("Could not find any subclusters with service name '{service}'"),
                )
                .await;
                Ok(ctx.requeue())
            }
            ResizeOutcome::Resized { changes } => {
                report_scaling_operation(ctx, vas, new_size).await?;
                for (name, old, new) in changes {
                    ctx.normal(
                        vas,
                        reasons::SUBCLUSTER_RESIZED,
                        format!("Resized subcluster '{name}' from {old} to {new}"),
                    )
                    .await;
                }
                Ok(StepOutcome::Continue)
            }
        }
    }
}
