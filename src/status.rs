//! VerticaAutoscaler status writers.
//!
//! Every writer re-reads the autoscaler, applies its mutation to the fresh
//! status and only writes when something changed. Conflicts re-run the whole
//! read-mutate-write sequence.

use crate::conditions::{build_condition, set_condition, ConditionType};
use crate::controllers::Context;
use crate::crd::{VerticaAutoscaler, VerticaAutoscalerStatus};
use crate::error::Result;
use crate::retry::retry_on_conflict;
use kube::ResourceExt;
use tracing::debug;

/// Apply `mutate` to the live status and persist it. `vas` is refreshed
/// with the stored object.
pub async fn update_status<F>(
    ctx: &Context,
    vas: &mut VerticaAutoscaler,
    operation: &str,
    mutate: F,
) -> Result<()>
where
    F: Fn(&mut VerticaAutoscalerStatus) + Send + Sync,
{
    let namespace = vas.namespace().unwrap_or_default();
    let name = vas.name_any();
    let (namespace, name, mutate, client) =
        (namespace.as_str(), name.as_str(), &mutate, ctx.client.as_ref());

    let stored = retry_on_conflict(&ctx.config.retry, operation, || async move {
        let mut fresh = client.get_autoscaler(namespace, name).await?;
        let before = fresh.status.clone().unwrap_or_default();
        let mut after = before.clone();
        mutate(&mut after);
        if after == before && fresh.status.is_some() {
            debug!(namespace, name, operation, "Status unchanged, skipping write");
            return Ok(fresh);
        }
        fresh.status = Some(after);
        client.replace_autoscaler_status(&fresh).await
    })
    .await?;

    *vas = stored;
    Ok(())
}

pub async fn update_condition(
    ctx: &Context,
    vas: &mut VerticaAutoscaler,
    condition_type: ConditionType,
    status: &str,
) -> Result<()> {
    update_status(ctx, vas, "update condition", |s| {
        set_condition(
            &mut s.conditions,
            condition_type,
            build_condition(condition_type, status),
        )
    })
    .await
}

/// Record a completed scale: bump the counter and store the new size.
pub async fn report_scaling_operation(
    ctx: &Context,
    vas: &mut VerticaAutoscaler,
    current_size: i32,
) -> Result<()> {
    update_status(ctx, vas, "report scaling operation", |s| {
        s.scaling_count += 1;
        s.current_size = current_size;
    })
    .await
}

pub async fn set_current_size(ctx: &Context, vas: &mut VerticaAutoscaler, current_size: i32) -> Result<()> {
    update_status(ctx, vas, "refresh current size", |s| {
        s.current_size = current_size;
    })
    .await
}

pub async fn set_selector(ctx: &Context, vas: &mut VerticaAutoscaler, selector: &str) -> Result<()> {
    update_status(ctx, vas, "refresh selector", |s| {
        if s.selector != selector {
            s.selector = selector.to_string();
        }
    })
    .await
}
