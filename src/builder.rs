//! Manifest builders for the external scaler objects.
//!
//! Pure functions: the reconcilers call these to get the expected object and
//! then decide between create, patch and no-op.

use crate::crd::{
    AdvancedConfig, AuthSecretTargetRef, AuthenticationRef, HorizontalPodAutoscalerConfig,
    ScaleTargetRef, ScaleTrigger, ScaleTriggers, ScaledObject, ScaledObjectSpec, TriggerAuthentication,
    TriggerAuthenticationSpec, TriggerType, VerticaAutoscaler,
};
use crate::names::{self, COMPONENT_LABEL, INSTANCE_LABEL, MANAGED_BY_LABEL, OPERATOR_NAME};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

const DEFAULT_RESOURCE_METRIC_TYPE: &str = "Utilization";

pub fn common_labels(vas: &VerticaAutoscaler) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_LABEL.to_string(), vas.spec.vertica_db_name.clone());
    labels.insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
    labels.insert(COMPONENT_LABEL.to_string(), "autoscaler".to_string());
    labels
}

pub fn owner_reference(vas: &VerticaAutoscaler) -> OwnerReference {
    OwnerReference {
        api_version: VerticaAutoscaler::api_version(&()).to_string(),
        kind: VerticaAutoscaler::kind(&()).to_string(),
        name: vas.name_any(),
        uid: vas.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn object_meta(vas: &VerticaAutoscaler, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: vas.namespace(),
        labels: Some(common_labels(vas)),
        owner_references: Some(vec![owner_reference(vas)]),
        ..Default::default()
    }
}

/// Expected HPA for an autoscaler using the HPA backend.
///
/// The HPA targets the autoscaler's own scale subresource, so its decisions
/// land in `spec.targetSize`.
pub fn build_horizontal_scaler(vas: &VerticaAutoscaler) -> Option<HorizontalPodAutoscaler> {
    let hpa = vas.hpa_config()?;
    Some(HorizontalPodAutoscaler {
        metadata: object_meta(vas, names::hpa_name(vas)),
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some(VerticaAutoscaler::api_version(&()).to_string()),
                kind: VerticaAutoscaler::kind(&()).to_string(),
                name: vas.name_any(),
            },
            min_replicas: Some(hpa.min_replicas),
            max_replicas: hpa.max_replicas,
            metrics: Some(hpa.metrics.iter().map(|m| m.metric.clone()).collect()),
            behavior: hpa.behavior.clone(),
        }),
        ..Default::default()
    })
}

/// Expected ScaledObject for an autoscaler using the KEDA backend.
pub fn build_scaled_object(vas: &VerticaAutoscaler) -> Option<ScaledObject> {
    let so = vas.scaled_object_config()?;
    let spec = ScaledObjectSpec {
        scale_target_ref: ScaleTargetRef {
            api_version: Some(VerticaAutoscaler::api_version(&()).to_string()),
            kind: Some(VerticaAutoscaler::kind(&()).to_string()),
            name: vas.name_any(),
        },
        polling_interval: Some(so.polling_interval),
        cooldown_period: Some(so.cooldown_period),
        min_replica_count: Some(so.min_replicas),
        max_replica_count: Some(so.max_replicas),
        advanced: so.behavior.as_ref().map(|b| AdvancedConfig {
            horizontal_pod_autoscaler_config: Some(HorizontalPodAutoscalerConfig {
                name: None,
                behavior: Some(b.clone()),
            }),
        }),
        triggers: so.metrics.iter().map(|t| build_trigger(vas, t)).collect(),
    };

    let mut obj = ScaledObject::new(&names::scaled_object_name(vas), spec);
    obj.metadata = object_meta(vas, names::scaled_object_name(vas));
    Some(obj)
}

fn build_trigger(vas: &VerticaAutoscaler, trigger: &ScaleTrigger) -> ScaleTriggers {
    let mut metadata = BTreeMap::new();
    let mut authentication_ref = None;
    let mut use_cached_metrics = None;
    let mut metric_type = trigger.metric_type.clone();

    match trigger.r#type {
        TriggerType::Prometheus => {
            if let Some(prom) = &trigger.prometheus {
                metadata.insert("serverAddress".to_string(), prom.server_address.clone());
                metadata.insert("query".to_string(), prom.query.clone());
                metadata.insert("threshold".to_string(), prom.threshold.to_string());
                if prom.unsafe_ssl {
                    metadata.insert("unsafeSsl".to_string(), "true".to_string());
                }
                if let Some(mode) = prom.auth_modes {
                    metadata.insert("authModes".to_string(), mode.as_str().to_string());
                }
                if !trigger.auth_secret.is_empty() {
                    authentication_ref = Some(AuthenticationRef {
                        name: names::trigger_authentication_name(vas, &trigger.auth_secret),
                        kind: None,
                    });
                }
                use_cached_metrics = Some(prom.use_cached_metrics);
            }
        }
        TriggerType::Cpu | TriggerType::Memory => {
            if let Some(res) = &trigger.resource {
                metadata.insert("value".to_string(), res.threshold.to_string());
            }
            if metric_type.is_none() {
                metric_type = Some(DEFAULT_RESOURCE_METRIC_TYPE.to_string());
            }
        }
    }

    ScaleTriggers {
        r#type: trigger.r#type.as_str().to_string(),
        name: (!trigger.name.is_empty()).then(|| trigger.name.clone()),
        metadata,
        authentication_ref,
        metric_type,
        use_cached_metrics,
    }
}

/// TriggerAuthentication mapping each `key` of the auth secret to the
/// trigger parameter of the same name.
pub fn build_trigger_authentication(
    vas: &VerticaAutoscaler,
    auth_secret: &str,
    keys: &[&str],
) -> TriggerAuthentication {
    let name = names::trigger_authentication_name(vas, auth_secret);
    let spec = TriggerAuthenticationSpec {
        secret_target_ref: keys
            .iter()
            .map(|key| AuthSecretTargetRef {
                parameter: key.to_string(),
                name: auth_secret.to_string(),
                key: key.to_string(),
            })
            .collect(),
    };
    let mut ta = TriggerAuthentication::new(&name, spec);
    ta.metadata = object_meta(vas, name);
    ta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        CustomAutoscalerSpec, CustomAutoscalerType, HpaConfig, MetricDefinition,
        PrometheusAuthMode, PrometheusTrigger, ResourceTrigger, ScaledObjectConfig,
        VerticaAutoscalerSpec,
    };
    use k8s_openapi::api::autoscaling::v2::{MetricSpec, MetricTarget, ResourceMetricSource};

    fn base_vas(custom: CustomAutoscalerSpec) -> VerticaAutoscaler {
        let mut vas = VerticaAutoscaler::new(
            "vas1",
            VerticaAutoscalerSpec {
                vertica_db_name: "vdb1".to_string(),
                service_name: "s".to_string(),
                custom_autoscaler: Some(custom),
                ..Default::default()
            },
        );
        vas.metadata.namespace = Some("default".to_string());
        vas.metadata.uid = Some("uid-1".to_string());
        vas
    }

    fn cpu_metric() -> MetricDefinition {
        MetricDefinition {
            scale_in_threshold: None,
            metric: MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: "cpu".to_string(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(50),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_build_horizontal_scaler() {
        let vas = base_vas(CustomAutoscalerSpec {
            r#type: CustomAutoscalerType::Hpa,
            hpa: Some(HpaConfig {
                min_replicas: 3,
                max_replicas: 12,
                metrics: vec![cpu_metric()],
                behavior: None,
            }),
            scaled_object: None,
        });

        let hpa = build_horizontal_scaler(&vas).unwrap();
        assert_eq!(hpa.metadata.name.as_deref(), Some("vas1"));
        assert_eq!(hpa.metadata.namespace.as_deref(), Some("default"));
        let owner = &hpa.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "VerticaAutoscaler");
        assert_eq!(owner.uid, "uid-1");

        let spec = hpa.spec.unwrap();
        assert_eq!(spec.scale_target_ref.name, "vas1");
        assert_eq!(spec.scale_target_ref.kind, "VerticaAutoscaler");
        assert_eq!(spec.min_replicas, Some(3));
        assert_eq!(spec.max_replicas, 12);
        let metrics = spec.metrics.unwrap();
        assert_eq!(metrics[0].resource.as_ref().unwrap().name, "cpu");
    }

    #[test]
    fn test_build_scaled_object() {
        let vas = base_vas(CustomAutoscalerSpec {
            r#type: CustomAutoscalerType::ScaledObject,
            hpa: None,
            scaled_object: Some(ScaledObjectConfig {
                min_replicas: 3,
                max_replicas: 6,
                polling_interval: 30,
                cooldown_period: 60,
                metrics: vec![
                    ScaleTrigger {
                        r#type: TriggerType::Prometheus,
                        name: "queries".to_string(),
                        auth_secret: "promauth".to_string(),
                        metric_type: Some("AverageValue".to_string()),
                        prometheus: Some(PrometheusTrigger {
                            server_address: "http://prometheus:9090".to_string(),
                            query: "sum(queries)".to_string(),
                            threshold: 50,
                            auth_modes: Some(PrometheusAuthMode::Basic),
                            ..Default::default()
                        }),
                        resource: None,
                    },
                    ScaleTrigger {
                        r#type: TriggerType::Cpu,
                        name: "cpu".to_string(),
                        resource: Some(ResourceTrigger { threshold: 80 }),
                        ..Default::default()
                    },
                ],
                behavior: None,
            }),
        });

        let so = build_scaled_object(&vas).unwrap();
        assert_eq!(so.spec.scale_target_ref.name, "vas1");
        assert_eq!(so.spec.min_replica_count, Some(3));
        assert_eq!(so.spec.max_replica_count, Some(6));
        assert_eq!(so.spec.cooldown_period, Some(60));
        assert!(so.spec.advanced.is_none());
        assert_eq!(so.spec.triggers.len(), 2);

        let prom = &so.spec.triggers[0];
        assert_eq!(prom.r#type, "prometheus");
        assert_eq!(prom.metadata["serverAddress"], "http://prometheus:9090");
        assert_eq!(prom.metadata["threshold"], "50");
        assert_eq!(prom.metadata["authModes"], "basic");
        assert_eq!(prom.authentication_ref.as_ref().unwrap().name, "vas1-promauth");

        let cpu = &so.spec.triggers[1];
        assert_eq!(cpu.r#type, "cpu");
        assert_eq!(cpu.metadata["value"], "80");
        assert_eq!(cpu.metric_type.as_deref(), Some("Utilization"));
    }

    #[test]
    fn test_builders_require_matching_backend() {
        let vas = base_vas(CustomAutoscalerSpec {
            r#type: CustomAutoscalerType::ScaledObject,
            hpa: Some(HpaConfig::default()),
            scaled_object: None,
        });
        assert!(build_horizontal_scaler(&vas).is_none());
        assert!(build_scaled_object(&vas).is_none());
    }

    #[test]
    fn test_build_trigger_authentication() {
        let vas = base_vas(CustomAutoscalerSpec::default());
        let ta = build_trigger_authentication(&vas, "promauth", &["username", "password"]);
        assert_eq!(ta.metadata.name.as_deref(), Some("vas1-promauth"));
        let refs = &ta.spec.secret_target_ref;
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].key, "username");
        assert_eq!(refs[1].key, "password");
        assert_eq!(refs[1].name, "promauth");
    }
}
