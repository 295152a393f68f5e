//! Object names and label selectors derived from a VerticaAutoscaler

use crate::crd::{ScaledObject, VerticaAutoscaler};
use kube::ResourceExt;

pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const SUBCLUSTER_SVC_NAME_LABEL: &str = "vertica.com/subcluster-svc";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
pub const OPERATOR_NAME: &str = "vertica-autoscaler-operator";

/// The HPA shares the autoscaler's name.
pub fn hpa_name(vas: &VerticaAutoscaler) -> String {
    vas.name_any()
}

/// The ScaledObject shares the autoscaler's name.
pub fn scaled_object_name(vas: &VerticaAutoscaler) -> String {
    vas.name_any()
}

pub fn trigger_authentication_name(vas: &VerticaAutoscaler, auth_secret: &str) -> String {
    format!("{}-{}", vas.name_any(), auth_secret)
}

/// HPA that KEDA runs on behalf of a ScaledObject: the name KEDA reported,
/// else the configured override, else KEDA's `keda-hpa-` default.
pub fn keda_hpa_name(so: &ScaledObject) -> String {
    if let Some(name) = so.status.as_ref().and_then(|s| s.hpa_name.clone()) {
        return name;
    }
    so.spec
        .advanced
        .as_ref()
        .and_then(|a| a.horizontal_pod_autoscaler_config.as_ref())
        .and_then(|c| c.name.clone())
        .unwrap_or_else(|| format!("keda-hpa-{}", so.name_any()))
}

/// Label selector for the pods an autoscaler covers, in the string form
/// the scale subresource publishes.
pub fn pod_selector(vas: &VerticaAutoscaler) -> String {
    let mut parts = vec![format!("{}={}", INSTANCE_LABEL, vas.spec.vertica_db_name)];
    if !vas.spec.service_name.is_empty() {
        parts.push(format!(
            "{}={}",
            SUBCLUSTER_SVC_NAME_LABEL, vas.spec.service_name
        ));
    }
    parts.sort();
    parts.join(",")
}
