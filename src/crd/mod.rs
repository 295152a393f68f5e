//! Custom Resource Definitions used by the autoscaler operator
//!
//! - VerticaDB: the database topology the operator scales
//! - VerticaAutoscaler: the scaling policy for a set of subclusters
//! - ScaledObject / TriggerAuthentication: KEDA resources driven by the operator

mod autoscaler;
mod keda;
mod verticadb;

pub use autoscaler::{
    AutoscalerCondition, CustomAutoscalerSpec, CustomAutoscalerType, HpaConfig, MetricDefinition,
    PrometheusAuthMode, PrometheusTrigger, ResourceTrigger, ScaleTrigger, ScaledObjectConfig,
    ScalingGranularity, TriggerType, VerticaAutoscaler, VerticaAutoscalerSpec,
    VerticaAutoscalerStatus,
};
pub use keda::{
    AdvancedConfig, AuthSecretTargetRef, AuthenticationRef, HorizontalPodAutoscalerConfig,
    KedaCondition, ScaleTargetRef, ScaleTriggers, ScaledObject, ScaledObjectSpec,
    ScaledObjectStatus, TriggerAuthentication, TriggerAuthenticationSpec,
};
pub use verticadb::{
    fqdn_compat, KSafety, Subcluster, SubclusterType, VerticaDB, VerticaDBSpec,
    KSAFETY0_MIN_HOSTS, KSAFETY1_MIN_HOSTS,
};
