//! Seeds `spec.targetSize` from the observed topology on first sight of an
//! autoscaler, so that a freshly created VerticaAutoscaler does not scale
//! the database to zero.

use super::{Context, ReconcileStep, StepOutcome};
use crate::conditions::{is_condition_true, ConditionType, CONDITION_TRUE};
use crate::crd::VerticaAutoscaler;
use crate::error::Result;
use crate::retry::retry_on_conflict;
use crate::status::update_condition;
use async_trait::async_trait;
use kube::ResourceExt;
use tracing::info;

pub(super) struct TargetSizeInitializer;

#[async_trait]
impl ReconcileStep for TargetSizeInitializer {
    fn name(&self) -> &'static str {
        "target-size-initializer"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        if is_condition_true(vas.conditions(), ConditionType::TargetSizeInitialized) {
            return Ok(StepOutcome::Continue);
        }

        if vas.spec.target_size == 0 {
            initialize_target_size(ctx, vas).await?;
        }

        update_condition(ctx, vas, ConditionType::TargetSizeInitialized, CONDITION_TRUE).await?;
        Ok(StepOutcome::Continue)
    }
}

async fn initialize_target_size(ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<()> {
    let ns = vas.namespace().unwrap_or_default();
    let name = vas.name_any();
    let vdb = ctx.client.get_verticadb(&ns, &vas.spec.vertica_db_name).await?;
    let (_, current) = vdb.find_subclusters_for_service(&vas.spec.service_name);

    let (client, ns, name) = (ctx.client.as_ref(), ns.as_str(), name.as_str());
    let stored = retry_on_conflict(&ctx.config.retry, "initialize targetSize", || async move {
        let mut fresh = client.get_autoscaler(ns, name).await?;
        if fresh.spec.target_size != 0 {
            return Ok(fresh);
        }
        fresh.spec.target_size = current;
        client.replace_autoscaler(&fresh).await
    })
    .await?;

    info!(namespace = ns, autoscaler = name, target_size = stored.spec.target_size, "Initialized targetSize");
    *vas = stored;
    Ok(())
}
