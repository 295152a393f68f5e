//! VerticaAutoscaler Custom Resource Definition
//!
//! Describes how a set of subclusters, selected by service name, should be
//! scaled and which external scaler backend drives the target size.
//!
//! The resource exposes a `scale` subresource over `.spec.targetSize` so
//! that an HPA or a KEDA ScaledObject can write the desired size directly.

use super::verticadb::Subcluster;
use k8s_openapi::api::autoscaling::v2::{HorizontalPodAutoscalerBehavior, MetricSpec, MetricTarget};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VerticaAutoscaler is the Schema for the verticaautoscalers API
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vertica.com",
    version = "v1",
    kind = "VerticaAutoscaler",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
    status = "VerticaAutoscalerStatus",
    shortname = "vas",
    scale = r#"{"specReplicasPath":".spec.targetSize","statusReplicasPath":".status.currentSize","labelSelectorPath":".status.selector"}"#,
    printcolumn = r#"{"name":"Granularity","type":"string","jsonPath":".spec.scalingGranularity"}"#,
    printcolumn = r#"{"name":"Current Size","type":"integer","jsonPath":".status.currentSize"}"#,
    printcolumn = r#"{"name":"Target Size","type":"integer","jsonPath":".spec.targetSize"}"#,
    printcolumn = r#"{"name":"Scaling Count","type":"integer","jsonPath":".status.scalingCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerticaAutoscalerSpec {
    /// Name of the VerticaDB in the same namespace
    #[serde(rename = "verticaDBName")]
    pub vertica_db_name: String,

    /// Whether scaling resizes existing subclusters or adds/removes them
    #[serde(default)]
    pub scaling_granularity: ScalingGranularity,

    /// Only subclusters exposed through this service are scaled. Empty
    /// selects every subcluster.
    #[serde(default)]
    pub service_name: String,

    /// Blueprint for subclusters created in subcluster granularity
    #[serde(default)]
    pub template: Subcluster,

    /// Desired total pod count across the selected subclusters
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub target_size: i32,

    /// External scaler backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_autoscaler: Option<CustomAutoscalerSpec>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ScalingGranularity {
    Pod,
    #[default]
    Subcluster,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CustomAutoscalerType {
    #[default]
    #[serde(rename = "HPA")]
    Hpa,
    ScaledObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomAutoscalerSpec {
    #[serde(default)]
    pub r#type: CustomAutoscalerType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hpa: Option<HpaConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled_object: Option<ScaledObjectConfig>,
}

/// Settings for the platform-native horizontal autoscaler backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HpaConfig {
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,

    pub max_replicas: i32,

    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<HorizontalPodAutoscalerBehavior>,
}

/// A scaling metric with an optional scale-in threshold.
///
/// While the metric stays at or above the threshold the HPA floor is held at
/// the current size, so the HPA cannot shrink the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_in_threshold: Option<MetricTarget>,

    pub metric: MetricSpec,
}

/// Settings for the KEDA backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaledObjectConfig {
    #[serde(default = "default_min_replicas")]
    pub min_replicas: i32,

    pub max_replicas: i32,

    /// Seconds between trigger polls
    #[serde(default = "default_polling_interval")]
    pub polling_interval: i32,

    /// Seconds to wait after the last active trigger before scaling in
    #[serde(default = "default_cooldown_period")]
    pub cooldown_period: i32,

    #[serde(default)]
    pub metrics: Vec<ScaleTrigger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<HorizontalPodAutoscalerBehavior>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Cpu,
    Memory,
    #[default]
    Prometheus,
}

impl ScaleTrigger {
    /// Scale-in threshold of a Prometheus trigger, if one is set.
    pub fn scale_in_threshold(&self) -> Option<i32> {
        if self.r#type != TriggerType::Prometheus {
            return None;
        }
        self.prometheus
            .as_ref()
            .map(|p| p.scale_in_threshold)
            .filter(|t| *t > 0)
    }
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cpu => "cpu",
            TriggerType::Memory => "memory",
            TriggerType::Prometheus => "prometheus",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScaleTrigger {
    #[serde(default)]
    pub r#type: TriggerType,

    #[serde(default)]
    pub name: String,

    /// Secret holding credentials for the metrics endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_secret: String,

    /// Utilization, Value or AverageValue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusTrigger>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceTrigger>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusTrigger {
    pub server_address: String,
    pub query: String,
    pub threshold: i32,

    /// Query value below which the ScaledObject floor may drop back to
    /// `minReplicas`. 0 disables the gate for this trigger.
    #[serde(default)]
    pub scale_in_threshold: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_modes: Option<PrometheusAuthMode>,

    #[serde(default)]
    pub unsafe_ssl: bool,

    #[serde(default)]
    pub use_cached_metrics: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ResourceTrigger {
    pub threshold: i32,
}

/// How the Prometheus trigger authenticates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum PrometheusAuthMode {
    #[serde(rename = "basic")]
    Basic,
    #[serde(rename = "bearer")]
    Bearer,
    #[serde(rename = "tls")]
    Tls,
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "tls,basic")]
    TlsAndBasic,
}

pub const SECRET_KEY_USERNAME: &str = "username";
pub const SECRET_KEY_PASSWORD: &str = "password";
pub const SECRET_KEY_BEARER_TOKEN: &str = "bearerToken";
pub const SECRET_KEY_CA: &str = "ca";
pub const SECRET_KEY_CERT: &str = "cert";
pub const SECRET_KEY_KEY: &str = "key";
pub const SECRET_KEY_CUSTOM_AUTH_HEADER: &str = "customAuthHeader";
pub const SECRET_KEY_CUSTOM_AUTH_VALUE: &str = "customAuthValue";

impl PrometheusAuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrometheusAuthMode::Basic => "basic",
            PrometheusAuthMode::Bearer => "bearer",
            PrometheusAuthMode::Tls => "tls",
            PrometheusAuthMode::Custom => "custom",
            PrometheusAuthMode::TlsAndBasic => "tls,basic",
        }
    }

    /// Keys the auth secret must carry, in the order they are referenced.
    pub fn required_secret_keys(&self) -> &'static [&'static str] {
        match self {
            PrometheusAuthMode::Basic => &[SECRET_KEY_USERNAME, SECRET_KEY_PASSWORD],
            PrometheusAuthMode::Bearer => &[SECRET_KEY_BEARER_TOKEN],
            PrometheusAuthMode::Tls => &[SECRET_KEY_CA, SECRET_KEY_CERT, SECRET_KEY_KEY],
            PrometheusAuthMode::Custom => {
                &[SECRET_KEY_CUSTOM_AUTH_HEADER, SECRET_KEY_CUSTOM_AUTH_VALUE]
            }
            PrometheusAuthMode::TlsAndBasic => &[
                SECRET_KEY_USERNAME,
                SECRET_KEY_PASSWORD,
                SECRET_KEY_CA,
                SECRET_KEY_CERT,
                SECRET_KEY_KEY,
            ],
        }
    }
}

/// Observed state of a VerticaAutoscaler
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerticaAutoscalerStatus {
    /// Number of scaling operations performed
    #[serde(default)]
    pub scaling_count: i32,

    /// Observed pod count across the selected subclusters
    #[serde(default)]
    pub current_size: i32,

    /// Label selector for the selected pods
    #[serde(default)]
    pub selector: String,

    /// Positional conditions; see [`crate::conditions::ConditionType`]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<AutoscalerCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerCondition {
    pub r#type: String,

    /// "True", "False" or "Unknown"
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

fn default_min_replicas() -> i32 {
    1
}

fn default_polling_interval() -> i32 {
    30
}

fn default_cooldown_period() -> i32 {
    30
}

impl VerticaAutoscaler {
    pub fn can_use_template(&self) -> bool {
        self.spec.template.size > 0
    }

    pub fn is_custom_autoscaler_set(&self) -> bool {
        self.spec.custom_autoscaler.is_some()
    }

    pub fn hpa_config(&self) -> Option<&HpaConfig> {
        self.spec
            .custom_autoscaler
            .as_ref()
            .filter(|ca| ca.r#type == CustomAutoscalerType::Hpa)
            .and_then(|ca| ca.hpa.as_ref())
    }

    pub fn scaled_object_config(&self) -> Option<&ScaledObjectConfig> {
        self.spec
            .custom_autoscaler
            .as_ref()
            .filter(|ca| ca.r#type == CustomAutoscalerType::ScaledObject)
            .and_then(|ca| ca.scaled_object.as_ref())
    }

    pub fn is_hpa_enabled(&self) -> bool {
        self.hpa_config().is_some()
    }

    pub fn is_scaled_object_enabled(&self) -> bool {
        self.scaled_object_config().is_some()
    }

    /// A backend is configured and has enough settings to be created.
    pub fn is_custom_metrics_enabled(&self) -> bool {
        self.is_hpa_enabled() || self.is_scaled_object_enabled()
    }

    /// True when at least one metric of the active backend carries a
    /// scale-in threshold, which puts the backend's floor under control of
    /// the scale-down gate.
    pub fn has_scale_down_threshold(&self) -> bool {
        if let Some(hpa) = self.hpa_config() {
            return hpa.metrics.iter().any(|m| m.scale_in_threshold.is_some());
        }
        self.scaled_object_config()
            .map(|so| so.metrics.iter().any(|t| t.scale_in_threshold().is_some()))
            .unwrap_or(false)
    }

    /// Number of metrics the active backend was configured with.
    pub fn configured_metric_count(&self) -> usize {
        if let Some(hpa) = self.hpa_config() {
            hpa.metrics.len()
        } else if let Some(so) = self.scaled_object_config() {
            so.metrics.len()
        } else {
            0
        }
    }

    /// Statically configured floor of the active backend.
    pub fn static_min_replicas(&self) -> Option<i32> {
        self.hpa_config()
            .map(|hpa| hpa.min_replicas)
            .or_else(|| self.scaled_object_config().map(|so| so.min_replicas))
    }

    pub fn current_size(&self) -> i32 {
        self.status.as_ref().map(|s| s.current_size).unwrap_or(0)
    }

    pub fn conditions(&self) -> &[AutoscalerCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hpa_autoscaler() -> VerticaAutoscaler {
        let json = serde_json::json!({
            "apiVersion": "vertica.com/v1",
            "kind": "VerticaAutoscaler",
            "metadata": {"name": "vas", "namespace": "default"},
            "spec": {
                "verticaDBName": "v",
                "serviceName": "s",
                "customAutoscaler": {
                    "type": "HPA",
                    "hpa": {
                        "maxReplicas": 12,
                        "metrics": [{
                            "metric": {
                                "type": "Resource",
                                "resource": {"name": "cpu", "target": {"type": "Utilization", "averageUtilization": 50}}
                            },
                            "scaleInThreshold": {"type": "Utilization", "averageUtilization": 20}
                        }]
                    }
                }
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_spec_defaults() {
        let spec: VerticaAutoscalerSpec =
            serde_json::from_str(r#"{"verticaDBName": "v"}"#).unwrap();
        assert_eq!(spec.scaling_granularity, ScalingGranularity::Subcluster);
        assert_eq!(spec.target_size, 0);
        assert!(spec.service_name.is_empty());
        assert!(spec.custom_autoscaler.is_none());
    }

    #[test]
    fn test_hpa_helpers() {
        let vas = hpa_autoscaler();
        assert!(vas.is_custom_autoscaler_set());
        assert!(vas.is_hpa_enabled());
        assert!(!vas.is_scaled_object_enabled());
        assert!(vas.has_scale_down_threshold());
        assert_eq!(vas.configured_metric_count(), 1);
        assert_eq!(vas.static_min_replicas(), Some(1));
        assert!(!vas.can_use_template());
    }

    #[test]
    fn test_type_mismatch_disables_backend() {
        let mut vas = hpa_autoscaler();
        if let Some(ca) = vas.spec.custom_autoscaler.as_mut() {
            ca.r#type = CustomAutoscalerType::ScaledObject;
        }
        assert!(vas.is_custom_autoscaler_set());
        assert!(!vas.is_custom_metrics_enabled());
        assert!(!vas.has_scale_down_threshold());
    }

    #[test]
    fn test_prometheus_scale_in_threshold() {
        let mut trigger: ScaleTrigger = serde_json::from_str(
            r#"{"type": "prometheus", "name": "m",
                "prometheus": {"serverAddress": "http://p:9090", "query": "q", "threshold": 50,
                "scaleInThreshold": 10}}"#,
        )
        .unwrap();
        assert_eq!(trigger.scale_in_threshold(), Some(10));

        if let Some(p) = trigger.prometheus.as_mut() {
            p.scale_in_threshold = 0;
        }
        assert_eq!(trigger.scale_in_threshold(), None);

        let cpu: ScaleTrigger =
            serde_json::from_str(r#"{"type": "cpu", "name": "c", "resource": {"threshold": 50}}"#).unwrap();
        assert_eq!(cpu.scale_in_threshold(), None);
    }

    #[test]
    fn test_scaled_object_defaults() {
        let cfg: ScaledObjectConfig = serde_json::from_str(
            r#"{"maxReplicas": 6, "metrics": [{"type": "prometheus", "name": "m",
                "prometheus": {"serverAddress": "http://p:9090", "query": "q", "threshold": 5,
                "authModes": "tls,basic"}}]}"#,
        )
        .unwrap();
        assert_eq!(cfg.min_replicas, 1);
        assert_eq!(cfg.polling_interval, 30);
        assert_eq!(cfg.cooldown_period, 30);
        let prom = cfg.metrics[0].prometheus.as_ref().unwrap();
        assert_eq!(prom.auth_modes, Some(PrometheusAuthMode::TlsAndBasic));
    }

    #[test]
    fn test_required_secret_keys_order() {
        assert_eq!(
            PrometheusAuthMode::TlsAndBasic.required_secret_keys(),
            &["username", "password", "ca", "cert", "key"]
        );
        assert_eq!(PrometheusAuthMode::Bearer.required_secret_keys(), &["bearerToken"]);
    }
}
