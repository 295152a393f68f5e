//! Creates or patches the external scaler object (HPA or KEDA ScaledObject)
//! an autoscaler delegates its target size to.
//!
//! Existing objects are never replaced. The operator owns the spec, labels
//! and annotations; everything else on the live object (status, fields
//! other controllers set) is left as found. The change is sent as a JSON
//! merge patch computed from the live object, so an object already in the
//! desired shape costs no write.

use super::{Context, ReconcileStep, StepOutcome};
use crate::builder::{build_horizontal_scaler, build_scaled_object, build_trigger_authentication};
use crate::client::ControlPlane;
use crate::crd::{ScaledObject, TriggerType, VerticaAutoscaler};
use crate::error::{OperatorError, Result};
use crate::events::reasons;
use crate::names;
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Secret;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Fields of the live object that survive a merge even when the expected
/// object says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreservedField {
    /// Owned by the scale-down gate once scale-in thresholds are in use
    MinReplicas,
}

/// The parts of a scaler object the operator reads and rewrites.
pub trait ManagedScaler: Resource<DynamicType = ()> + Clone + Serialize + Send + Sync {
    fn min_replicas(&self) -> Option<i32>;

    fn set_min_replicas(&mut self, min: Option<i32>);

    fn max_replicas(&self) -> Option<i32>;

    fn copy_spec_from(&mut self, other: &Self);
}

impl ManagedScaler for HorizontalPodAutoscaler {
    fn min_replicas(&self) -> Option<i32> {
        self.spec.as_ref().and_then(|s| s.min_replicas)
    }

    fn set_min_replicas(&mut self, min: Option<i32>) {
        if let Some(spec) = self.spec.as_mut() {
            spec.min_replicas = min;
        }
    }

    fn max_replicas(&self) -> Option<i32> {
        self.spec.as_ref().map(|s| s.max_replicas)
    }

    fn copy_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

impl ManagedScaler for ScaledObject {
    fn min_replicas(&self) -> Option<i32> {
        self.spec.min_replica_count
    }

    fn set_min_replicas(&mut self, min: Option<i32>) {
        self.spec.min_replica_count = min;
    }

    fn max_replicas(&self) -> Option<i32> {
        self.spec.max_replica_count
    }

    fn copy_spec_from(&mut self, other: &Self) {
        self.spec = other.spec.clone();
    }
}

/// Apply the operator-owned parts of `expected` onto a copy of `current`.
pub fn merge_managed_fields<T: ManagedScaler>(
    current: &T,
    expected: &T,
    preserve: &[PreservedField],
) -> T {
    let mut merged = current.clone();
    merged.copy_spec_from(expected);
    merged.meta_mut().labels = expected.meta().labels.clone();
    merged.meta_mut().annotations = expected.meta().annotations.clone();

    for field in preserve {
        match field {
            PreservedField::MinReplicas => merged.set_min_replicas(current.min_replicas()),
        }
    }
    merged
}

/// RFC 7386 merge patch turning `original` into `modified`, or `None` when
/// they are equal.
pub fn merge_patch(original: &Value, modified: &Value) -> Option<Value> {
    match (original, modified) {
        (Value::Object(orig), Value::Object(modi)) => {
            let mut patch = Map::new();
            for (key, new) in modi {
                match orig.get(key) {
                    Some(old) => {
                        if let Some(p) = merge_patch(old, new) {
                            patch.insert(key.clone(), p);
                        }
                    }
                    None if new.is_null() => {}
                    None => {
                        patch.insert(key.clone(), new.clone());
                    }
                }
            }
            for key in orig.keys() {
                if !modi.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if original == modified => None,
        _ => Some(modified.clone()),
    }
}

/// Projection of an object onto the fields the operator manages.
fn managed_view<T: Serialize>(obj: &T) -> Result<Value> {
    let full = serde_json::to_value(obj)?;
    Ok(json!({
        "metadata": {
            "labels": full["metadata"]["labels"],
            "annotations": full["metadata"]["annotations"],
        },
        "spec": full["spec"],
    }))
}

/// Check that every key in `keys` is present in `secret`.
pub fn validate_secret_keys(secret: &Secret, keys: &[&str]) -> Result<()> {
    for key in keys {
        let in_data = secret.data.as_ref().is_some_and(|d| d.contains_key(*key));
        let in_string_data = secret
            .string_data
            .as_ref()
            .is_some_and(|d| d.contains_key(*key));
        if !in_data && !in_string_data {
            return Err(OperatorError::inconsistency(format!("{key} not found in secret")));
        }
    }
    Ok(())
}

/// Keys carried by a secret in `data` or `stringData`, sorted and deduplicated.
fn secret_keys(secret: &Secret) -> Vec<String> {
    let data = secret.data.iter().flat_map(|d| d.keys());
    let string_data = secret.string_data.iter().flat_map(|d| d.keys());
    data.chain(string_data)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// API access and policy for one kind of scaler object.
#[async_trait]
trait ScalerBackend: Send + Sync {
    type Object: ManagedScaler;

    fn kind(&self) -> &'static str;

    fn expected(&self, vas: &VerticaAutoscaler) -> Option<Self::Object>;

    fn preserved_fields(&self, vas: &VerticaAutoscaler) -> Vec<PreservedField>;

    async fn get(&self, client: &dyn ControlPlane, ns: &str, name: &str) -> Result<Self::Object>;

    async fn create(&self, client: &dyn ControlPlane, obj: &Self::Object) -> Result<Self::Object>;

    async fn patch(&self, client: &dyn ControlPlane, ns: &str, name: &str, patch: &Value) -> Result<Self::Object>;
}

struct HpaBackend;

#[async_trait]
impl ScalerBackend for HpaBackend {
    type Object = HorizontalPodAutoscaler;

    fn kind(&self) -> &'static str {
        "HorizontalPodAutoscaler"
    }

    fn expected(&self, vas: &VerticaAutoscaler) -> Option<HorizontalPodAutoscaler> {
        build_horizontal_scaler(vas)
    }

    fn preserved_fields(&self, vas: &VerticaAutoscaler) -> Vec<PreservedField> {
        if vas.has_scale_down_threshold() {
            vec![PreservedField::MinReplicas]
        } else {
            Vec::new()
        }
    }

    async fn get(&self, client: &dyn ControlPlane, ns: &str, name: &str) -> Result<HorizontalPodAutoscaler> {
        client.get_hpa(ns, name).await
    }

    async fn create(&self, client: &dyn ControlPlane, obj: &HorizontalPodAutoscaler) -> Result<HorizontalPodAutoscaler> {
        client.create_hpa(obj).await
    }

    async fn patch(&self, client: &dyn ControlPlane, ns: &str, name: &str, patch: &Value) -> Result<HorizontalPodAutoscaler> {
        client.patch_hpa(ns, name, patch).await
    }
}

struct ScaledObjectBackend;

#[async_trait]
impl ScalerBackend for ScaledObjectBackend {
    type Object = ScaledObject;

    fn kind(&self) -> &'static str {
        "ScaledObject"
    }

    fn expected(&self, vas: &VerticaAutoscaler) -> Option<ScaledObject> {
        build_scaled_object(vas)
    }

    fn preserved_fields(&self, vas: &VerticaAutoscaler) -> Vec<PreservedField> {
        if vas.has_scale_down_threshold() {
            vec![PreservedField::MinReplicas]
        } else {
            Vec::new()
        }
    }

    async fn get(&self, client: &dyn ControlPlane, ns: &str, name: &str) -> Result<ScaledObject> {
        client.get_scaled_object(ns, name).await
    }

    async fn create(&self, client: &dyn ControlPlane, obj: &ScaledObject) -> Result<ScaledObject> {
        client.create_scaled_object(obj).await
    }

    async fn patch(&self, client: &dyn ControlPlane, ns: &str, name: &str, patch: &Value) -> Result<ScaledObject> {
        client.patch_scaled_object(ns, name, patch).await
    }
}

/// Create the backend object if it is missing, otherwise bring the
/// operator-owned fields in line with the autoscaler.
async fn sync_scaler<B: ScalerBackend>(backend: &B, ctx: &Context, vas: &VerticaAutoscaler) -> Result<()> {
    let Some(expected) = backend.expected(vas) else {
        return Ok(());
    };
    let ns = vas.namespace().unwrap_or_default();
    let name = expected.name_any();
    let kind = backend.kind();
    let client = ctx.client.as_ref();

    let current = match backend.get(client, &ns, &name).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => {
            info!(namespace = %ns, name = %name, kind, "Creating scaler object");
            backend.create(client, &expected).await?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let merged = merge_managed_fields(&current, &expected, &backend.preserved_fields(vas));
    let Some(patch) = merge_patch(&managed_view(&current)?, &managed_view(&merged)?) else {
        debug!(namespace = %ns, name = %name, kind, "Scaler object up to date");
        return Ok(());
    };

    let patched = backend.patch(client, &ns, &name, &patch).await?;
    info!(
        namespace = %ns,
        name = %name,
        kind,
        old_min_replicas = ?current.min_replicas(),
        old_max_replicas = ?current.max_replicas(),
        min_replicas = ?patched.min_replicas(),
        max_replicas = ?patched.max_replicas(),
        "Patched scaler object"
    );
    Ok(())
}

/// Ensure a TriggerAuthentication exists for every Prometheus trigger that
/// authenticates through a secret.
async fn ensure_trigger_authentications(ctx: &Context, vas: &VerticaAutoscaler) -> Result<StepOutcome> {
    let Some(so) = vas.scaled_object_config() else {
        return Ok(StepOutcome::Continue);
    };
    let ns = vas.namespace().unwrap_or_default();
    let client = ctx.client.as_ref();

    for trigger in &so.metrics {
        if trigger.r#type != TriggerType::Prometheus || trigger.auth_secret.is_empty() {
            continue;
        }
        let mode = trigger.prometheus.as_ref().and_then(|p| p.auth_modes);

        let secret = match client.get_secret(&ns, &trigger.auth_secret).await {
            Ok(secret) => secret,
            Err(e) if e.is_not_found() => {
                ctx.warn(
                    vas,
                    reasons::AUTH_SECRET_NOT_FOUND,
                    format!("Could not find the secret '{}'", trigger.auth_secret),
                )
                .await;
                return Ok(ctx.requeue());
            }
            Err(e) => return Err(e),
        };
        // Without an auth mode every key of the secret is passed through.
        let keys: Vec<String> = match mode {
            Some(mode) => {
                validate_secret_keys(&secret, mode.required_secret_keys())?;
                mode.required_secret_keys().iter().map(|k| k.to_string()).collect()
            }
            None => secret_keys(&secret),
        };
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();

        let ta_name = names::trigger_authentication_name(vas, &trigger.auth_secret);
        match client.get_trigger_authentication(&ns, &ta_name).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                info!(namespace = %ns, name = %ta_name, "Creating TriggerAuthentication");
                let ta = build_trigger_authentication(vas, &trigger.auth_secret, &keys);
                client.create_trigger_authentication(&ta).await?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(StepOutcome::Continue)
}

pub(super) struct ScalerObjectReconciler;

#[async_trait]
impl ReconcileStep for ScalerObjectReconciler {
    fn name(&self) -> &'static str {
        "scaler-object"
    }

    async fn reconcile(&self, ctx: &Context, vas: &mut VerticaAutoscaler) -> Result<StepOutcome> {
        if !vas.is_custom_metrics_enabled() {
            return Ok(StepOutcome::Continue);
        }
        if vas.is_hpa_enabled() {
            sync_scaler(&HpaBackend, ctx, vas).await?;
            return Ok(StepOutcome::Continue);
        }

        let outcome = ensure_trigger_authentications(ctx, vas).await?;
        if outcome != StepOutcome::Continue {
            return Ok(outcome);
        }
        sync_scaler(&ScaledObjectBackend, ctx, vas).await?;
        Ok(StepOutcome::Continue)
    }
}
