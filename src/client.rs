//! Control-plane access used by the reconcilers.
//!
//! Reconcilers talk to the API server only through [`ControlPlane`] so they
//! can be driven by a mock in unit tests. Missing objects surface as
//! [`OperatorError::NotFound`] and stale writes as [`OperatorError::Conflict`].

use crate::crd::{ScaledObject, TriggerAuthentication, VerticaAutoscaler, VerticaDB};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Value};

#[cfg(test)]
use mockall::automock;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn get_verticadb(&self, namespace: &str, name: &str) -> Result<VerticaDB>;

    /// Full replace guarded by the object's resourceVersion.
    async fn replace_verticadb(&self, vdb: &VerticaDB) -> Result<VerticaDB>;

    async fn get_autoscaler(&self, namespace: &str, name: &str) -> Result<VerticaAutoscaler>;

    /// Full replace of the spec guarded by the object's resourceVersion.
    async fn replace_autoscaler(&self, vas: &VerticaAutoscaler) -> Result<VerticaAutoscaler>;

    /// Write `vas.status` guarded by the object's resourceVersion.
    async fn replace_autoscaler_status(&self, vas: &VerticaAutoscaler) -> Result<VerticaAutoscaler>;

    async fn get_hpa(&self, namespace: &str, name: &str) -> Result<HorizontalPodAutoscaler>;

    async fn create_hpa(&self, hpa: &HorizontalPodAutoscaler) -> Result<HorizontalPodAutoscaler>;

    /// JSON merge patch
    async fn patch_hpa(&self, namespace: &str, name: &str, patch: &Value) -> Result<HorizontalPodAutoscaler>;

    async fn get_scaled_object(&self, namespace: &str, name: &str) -> Result<ScaledObject>;

    async fn create_scaled_object(&self, so: &ScaledObject) -> Result<ScaledObject>;

    /// JSON merge patch
    async fn patch_scaled_object(&self, namespace: &str, name: &str, patch: &Value) -> Result<ScaledObject>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn get_trigger_authentication(&self, namespace: &str, name: &str) -> Result<TriggerAuthentication>;

    async fn create_trigger_authentication(&self, ta: &TriggerAuthentication) -> Result<TriggerAuthentication>;
}

/// [`ControlPlane`] backed by a live `kube::Client`.
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = kube::core::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn describe(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind} {namespace}/{name}")
}

fn namespace_of<K: ResourceExt>(obj: &K) -> Result<String> {
    obj.namespace()
        .ok_or_else(|| OperatorError::InvalidState(format!("{} has no namespace", obj.name_any())))
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn get_verticadb(&self, namespace: &str, name: &str) -> Result<VerticaDB> {
        self.api::<VerticaDB>(namespace)
            .get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("VerticaDB", namespace, name)))
    }

    async fn replace_verticadb(&self, vdb: &VerticaDB) -> Result<VerticaDB> {
        let ns = namespace_of(vdb)?;
        let name = vdb.name_any();
        self.api::<VerticaDB>(&ns)
            .replace(&name, &PostParams::default(), vdb)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("VerticaDB", &ns, &name)))
    }

    async fn get_autoscaler(&self, namespace: &str, name: &str) -> Result<VerticaAutoscaler> {
        self.api::<VerticaAutoscaler>(namespace)
            .get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("VerticaAutoscaler", namespace, name)))
    }

    async fn replace_autoscaler(&self, vas: &VerticaAutoscaler) -> Result<VerticaAutoscaler> {
        let ns = namespace_of(vas)?;
        let name = vas.name_any();
        self.api::<VerticaAutoscaler>(&ns)
            .replace(&name, &PostParams::default(), vas)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("VerticaAutoscaler", &ns, &name)))
    }

    async fn replace_autoscaler_status(&self, vas: &VerticaAutoscaler) -> Result<VerticaAutoscaler> {
        let ns = namespace_of(vas)?;
        let name = vas.name_any();
        // Carrying the resourceVersion turns the merge patch into a
        // conditional write.
        let patch = json!({
            "metadata": { "resourceVersion": vas.resource_version() },
            "status": vas.status,
        });
        self.api::<VerticaAutoscaler>(&ns)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("VerticaAutoscaler status", &ns, &name)))
    }

    async fn get_hpa(&self, namespace: &str, name: &str) -> Result<HorizontalPodAutoscaler> {
        self.api::<HorizontalPodAutoscaler>(namespace)
            .get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("HorizontalPodAutoscaler", namespace, name)))
    }

    async fn create_hpa(&self, hpa: &HorizontalPodAutoscaler) -> Result<HorizontalPodAutoscaler> {
        let ns = namespace_of(hpa)?;
        self.api::<HorizontalPodAutoscaler>(&ns)
            .create(&PostParams::default(), hpa)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("HorizontalPodAutoscaler", &ns, &hpa.name_any())))
    }

    async fn patch_hpa(&self, namespace: &str, name: &str, patch: &Value) -> Result<HorizontalPodAutoscaler> {
        self.api::<HorizontalPodAutoscaler>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("HorizontalPodAutoscaler", namespace, name)))
    }

    async fn get_scaled_object(&self, namespace: &str, name: &str) -> Result<ScaledObject> {
        self.api::<ScaledObject>(namespace)
            .get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("ScaledObject", namespace, name)))
    }

    async fn create_scaled_object(&self, so: &ScaledObject) -> Result<ScaledObject> {
        let ns = namespace_of(so)?;
        self.api::<ScaledObject>(&ns)
            .create(&PostParams::default(), so)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("ScaledObject", &ns, &so.name_any())))
    }

    async fn patch_scaled_object(&self, namespace: &str, name: &str, patch: &Value) -> Result<ScaledObject> {
        self.api::<ScaledObject>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("ScaledObject", namespace, name)))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.api::<Secret>(namespace)
            .get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("Secret", namespace, name)))
    }

    async fn get_trigger_authentication(&self, namespace: &str, name: &str) -> Result<TriggerAuthentication> {
        self.api::<TriggerAuthentication>(namespace)
            .get(name)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("TriggerAuthentication", namespace, name)))
    }

    async fn create_trigger_authentication(&self, ta: &TriggerAuthentication) -> Result<TriggerAuthentication> {
        let ns = namespace_of(ta)?;
        self.api::<TriggerAuthentication>(&ns)
            .create(&PostParams::default(), ta)
            .await
            .map_err(|e| OperatorError::from_kube(e, describe("TriggerAuthentication", &ns, &ta.name_any())))
    }
}
