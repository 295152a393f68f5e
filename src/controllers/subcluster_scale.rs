//! Subcluster granularity: reach the target size by adding or removing
//! whole subclusters.

use super::{Context, ReconcileStep, StepOutcome};
use crate::conditions::{is_condition_true, ConditionType};
use crate::crd::{fqdn_compat, ScalingGranularity, Subcluster, VerticaAutoscaler, VerticaDB};
use crate::error::Result;
use crate::events::reasons;
use crate::retry::retry_on_conflict;
use crate::status::report_scaling_operation;
use async_trait::async_trait;
use kube::ResourceExt;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// What a scaling pass did to the subcluster list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleOutcome {
    Unchanged,
    Grew { added: Vec<String> },
    Shrunk { removed: Vec<String> },
    /// Growth wanted, but the template is empty and no subcluster is bound
    /// to the service to serve as a base.
    NoBaseSubcluster,
}

impl ScaleOutcome {
    fn changed(&self) -> bool {
        matches!(self, ScaleOutcome::Grew { .. } | ScaleOutcome::Shrunk { .. })
    }
}

/// First `<prefix>-<i>` not present in `taken`, scanning up from 0.
///
/// The prefix is the template name, or the autoscaler's name when the
/// template has none.
pub fn next_subcluster_name(vas: &VerticaAutoscaler, taken: &BTreeSet<String>) -> String {
    let prefix = if vas.spec.template.name.is_empty() {
        vas.name_any()
    } else {
        fqdn_compat(&vas.spec.template.name)
    };
    (0..)
        .map(|i| format!("{prefix}-{i}"))
        .find(|name| !taken.contains(name))
        .unwrap_or(prefix)
}

/// Converge the subclusters bound to the autoscaler's service on its
/// target size. Mutates `vdb` in place.
pub fn scale_subclusters(vdb: &mut VerticaDB, vas: &VerticaAutoscaler) -> ScaleOutcome {
    let service = vas.spec.service_name.as_str();
    let (_, current) = vdb.find_subclusters_for_service(service);
    let delta = vas.spec.target_size.saturating_sub(current);
    match delta.cmp(&0) {
        Ordering::Greater => add_subclusters(vdb, vas, delta),
        Ordering::Less => remove_subclusters(vdb, service, -delta),
        Ordering::Equal => ScaleOutcome::Unchanged,
    }
}

/// Blueprint for new subclusters: the template when it has a size,
/// otherwise the last subcluster bound to the service.
fn base_subcluster(vdb: &VerticaDB, vas: &VerticaAutoscaler) -> Option<Subcluster> {
    let service = vas.spec.service_name.as_str();
    let mut base = if vas.can_use_template() {
        vas.spec.template.clone()
    } else {
        let (indices, _) = vdb.find_subclusters_for_service(service);
        vdb.spec.subclusters.get(*indices.last()?)?.clone()
    };
    if !service.is_empty() {
        base.service_name = service.to_string();
    }
    (base.size > 0).then_some(base)
}

fn add_subclusters(vdb: &mut VerticaDB, vas: &VerticaAutoscaler, mut needed: i32) -> ScaleOutcome {
    let Some(base) = base_subcluster(vdb, vas) else {
        return ScaleOutcome::NoBaseSubcluster;
    };

    let mut taken = vdb.subcluster_names();
    let mut added = Vec::new();
    while needed >= base.size {
        let mut sc = base.clone();
        sc.name = next_subcluster_name(vas, &taken);
        info!(verticadb = %vdb.name_any(), subcluster = %sc.name, size = sc.size, "Adding subcluster");
        taken.insert(sc.name.clone());
        added.push(sc.name.clone());
        needed -= sc.size;
        vdb.spec.subclusters.push(sc);
    }

    if added.is_empty() {
        ScaleOutcome::Unchanged
    } else {
        ScaleOutcome::Grew { added }
    }
}

/// Remove whole subclusters, last defined first. Candidates larger than
/// what is left to remove, or whose removal would take the primaries under
/// the k-safety floor, are passed over.
fn remove_subclusters(vdb: &mut VerticaDB, service: &str, mut to_remove: i32) -> ScaleOutcome {
    let min_primaries = vdb.min_primary_hosts();
    let mut primaries = vdb.primary_count();
    let mut removed = Vec::new();

    for i in (0..vdb.spec.subclusters.len()).rev() {
        if to_remove <= 0 {
            break;
        }
        let sc = &vdb.spec.subclusters[i];
        if !sc.matches_service(service) || sc.size > to_remove {
            continue;
        }
        if sc.is_primary() {
            if primaries.saturating_sub(sc.size) < min_primaries {
                debug!(subcluster = %sc.name, primaries, min_primaries, "Keeping primary subcluster for k-safety");
                continue;
            }
            primaries -= sc.size;
        }
        to_remove -= sc.size;
        let sc = vdb.spec.subclusters.remove(i);
        info!(verticadb = %vdb.name_any(), subcluster = %sc.name, size = sc.size, "Removing subcluster");
        removed.push(sc.name);
    }

    if removed.is_empty() {
        ScaleOutcome::Unchanged
    } else {
        ScaleOutcome::Shrunk { removed }
    }
}

/// Target size 0 before initialization is a placeholder, not a request to
/// scale to zero.
pub(super) fn ignores_target(vas: &VerticaAutoscaler) -> bool {
    vas.spec.target_size == 0 && !is_condition_true(vas.conditions(), ConditionType::TargetSizeInitialized)
}

pub(super) struct SubclusterScale;

#[async_trait]
impl ReconcileStep for SubclusterScale {
    fn name(&self) -> &'static str {
        "subcluster-scale"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        if vas.spec.scaling_granularity != ScalingGranularity::Subcluster || ignores_target(vas) {
            return Ok(StepOutcome::Continue);
        }

        let ns = vas.namespace().unwrap_or_default();
        let ns = ns.as_str();
        let client = ctx.client.as_ref();
        let policy: &VerticaAutoscaler = vas;
        let (outcome, new_size) = retry_on_conflict(&ctx.config.retry, "scale subclusters", || async move {
            let mut vdb = client.get_verticadb(ns, &policy.spec.vertica_db_name).await?;
            let outcome = scale_subclusters(&mut vdb, policy);
            if outcome.changed() {
                vdb = client.replace_verticadb(&vdb).await?;
            }
            let (_, size) = vdb.find_subclusters_for_service(&policy.spec.service_name);
            Ok((outcome, size))
        })
        .await?;

        let db = vas.spec.vertica_db_name.clone();
        match outcome {
            ScaleOutcome::Unchanged => {}
            ScaleOutcome::NoBaseSubcluster => {
                ctx.warn(
                    vas,
                    reasons::NO_SUBCLUSTER_TEMPLATE,
                    "Could not determine size of the next subcluster. Template in VerticaAutoscaler \
                     is empty and no existing subcluster can be used as a base"
                        .to_string(),
                )
                .await;
            }
            ScaleOutcome::Grew { added } => {
                report_scaling_operation(ctx, vas, new_size).await?;
                for name in added {
                    ctx.normal(
                        vas,
                        reasons::SUBCLUSTER_ADDED,
                        format!("Added subcluster '{name}' to VerticaDB '{db}'"),
                    )
                    .await;
                }
            }
            ScaleOutcome::Shrunk { removed } => {
                report_scaling_operation(ctx, vas, new_size).await?;
                for name in removed {
                    ctx.normal(
                        vas,
                        reasons::SUBCLUSTER_REMOVED,
                        format!("Removed subcluster '{name}' from VerticaDB '{db}'"),
                    )
                    .await;
                }
            }
        }
        Ok(StepOutcome::Continue)
    }
}
