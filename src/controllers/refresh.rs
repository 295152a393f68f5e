//! Publishes the observed size and pod selector on the autoscaler status so
//! the scale subresource reports them to external scalers.

use super::{Context, ReconcileStep, StepOutcome};
use crate::crd::VerticaAutoscaler;
use crate::error::Result;
use crate::names;
use crate::status::{set_current_size, set_selector};
use async_trait::async_trait;
use kube::ResourceExt;

pub(super) struct RefreshCurrentSize;

#[async_trait]
impl ReconcileStep for RefreshCurrentSize {
    fn name(&self) -> &'static str {
        "refresh-current-size"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        let ns = vas.namespace().unwrap_or_default();
        let vdb = ctx.client.get_verticadb(&ns, &vas.spec.vertica_db_name).await?;
        let (_, current) = vdb.find_subclusters_for_service(&vas.spec.service_name);
        if vas.status.is_none() || vas.current_size() != current {
            set_current_size(ctx, vas, current).await?;
        }
        Ok(StepOutcome::Continue)
    }
}

pub(super) struct RefreshSelector;

#[async_trait]
impl ReconcileStep for RefreshSelector {
    fn name(&self) -> &'static str {
        "refresh-selector"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        let selector = names::pod_selector(vas);
        let stale = vas
            .status
            .as_ref()
            .map(|s| s.selector != selector)
            .unwrap_or(true);
        if stale {
            set_selector(ctx, vas, &selector).await?;
        }
        Ok(StepOutcome::Continue)
    }
}
