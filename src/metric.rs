//! Metric status extraction and threshold comparison.
//!
//! HPA metric statuses come in five shapes selected by a `type` tag. Each
//! shape carries a name and a [`MetricValueStatus`]; [`ReportedMetric`]
//! flattens them so callers can match a reported value against configured
//! thresholds by name.

use k8s_openapi::api::autoscaling::v2::{MetricSpec, MetricStatus, MetricTarget, MetricValueStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::cmp::Ordering;

/// A reported metric, by source kind.
#[derive(Debug, Clone, Copy)]
pub enum ReportedMetric<'a> {
    Pods { name: &'a str, current: &'a MetricValueStatus },
    Object { name: &'a str, current: &'a MetricValueStatus },
    External { name: &'a str, current: &'a MetricValueStatus },
    Resource { name: &'a str, current: &'a MetricValueStatus },
    ContainerResource { name: &'a str, current: &'a MetricValueStatus },
}

impl<'a> ReportedMetric<'a> {
    /// `None` for unrecognized type tags or when the tagged field is absent.
    pub fn from_status(status: &'a MetricStatus) -> Option<Self> {
        match status.type_.as_str() {
            "Pods" => status.pods.as_ref().map(|m| ReportedMetric::Pods {
                name: &m.metric.name,
                current: &m.current,
            }),
            "Object" => status.object.as_ref().map(|m| ReportedMetric::Object {
                name: &m.metric.name,
                current: &m.current,
            }),
            "External" => status.external.as_ref().map(|m| ReportedMetric::External {
                name: &m.metric.name,
                current: &m.current,
            }),
            "Resource" => status.resource.as_ref().map(|m| ReportedMetric::Resource {
                name: &m.name,
                current: &m.current,
            }),
            "ContainerResource" => {
                status
                    .container_resource
                    .as_ref()
                    .map(|m| ReportedMetric::ContainerResource {
                        name: &m.name,
                        current: &m.current,
                    })
            }
            _ => None,
        }
    }

    pub fn name(&self) -> &'a str {
        match *self {
            ReportedMetric::Pods { name, .. }
            | ReportedMetric::Object { name, .. }
            | ReportedMetric::External { name, .. }
            | ReportedMetric::Resource { name, .. }
            | ReportedMetric::ContainerResource { name, .. } => name,
        }
    }

    pub fn current(&self) -> &'a MetricValueStatus {
        match *self {
            ReportedMetric::Pods { current, .. }
            | ReportedMetric::Object { current, .. }
            | ReportedMetric::External { current, .. }
            | ReportedMetric::Resource { current, .. }
            | ReportedMetric::ContainerResource { current, .. } => current,
        }
    }
}

/// Name of a configured metric, using the same rules as [`ReportedMetric`].
pub fn spec_metric_name(spec: &MetricSpec) -> Option<&str> {
    match spec.type_.as_str() {
        "Pods" => spec.pods.as_ref().map(|m| m.metric.name.as_str()),
        "Object" => spec.object.as_ref().map(|m| m.metric.name.as_str()),
        "External" => spec.external.as_ref().map(|m| m.metric.name.as_str()),
        "Resource" => spec.resource.as_ref().map(|m| m.name.as_str()),
        "ContainerResource" => spec.container_resource.as_ref().map(|m| m.name.as_str()),
        _ => None,
    }
}

/// Outcome of comparing a current value with a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Below,
    Equal,
    Above,
    /// Neither side shares a populated representation, or a quantity could
    /// not be parsed. Never to be read as `Equal`.
    CannotCompare,
}

impl From<Ordering> for Comparison {
    fn from(ord: Ordering) -> Self {
        match ord {
            Ordering::Less => Comparison::Below,
            Ordering::Equal => Comparison::Equal,
            Ordering::Greater => Comparison::Above,
        }
    }
}

/// Compare `current` against `target` on the first representation both
/// populate: utilization, then value, then average value.
pub fn compare(current: &MetricValueStatus, target: &MetricTarget) -> Comparison {
    if let (Some(cur), Some(tgt)) = (current.average_utilization, target.average_utilization) {
        return cur.cmp(&tgt).into();
    }
    if let (Some(cur), Some(tgt)) = (&current.value, &target.value) {
        return compare_quantities(cur, tgt);
    }
    if let (Some(cur), Some(tgt)) = (&current.average_value, &target.average_value) {
        return compare_quantities(cur, tgt);
    }
    Comparison::CannotCompare
}

fn compare_quantities(current: &Quantity, target: &Quantity) -> Comparison {
    match (parse_quantity(current), parse_quantity(target)) {
        (Some(cur), Some(tgt)) => cur
            .partial_cmp(&tgt)
            .map(Comparison::from)
            .unwrap_or(Comparison::CannotCompare),
        _ => Comparison::CannotCompare,
    }
}

/// Parse a Kubernetes quantity ("500m", "1.5Gi", "2e3", "10") into a float.
pub fn parse_quantity(q: &Quantity) -> Option<f64> {
    let s = q.0.trim();
    if s.is_empty() {
        return None;
    }

    const SUFFIXES: &[(&str, f64)] = &[
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("n", 1e-9),
        ("u", 1e-6),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];

    for (suffix, mult) in SUFFIXES {
        if let Some(num) = s.strip_suffix(suffix) {
            return num.parse::<f64>().ok().map(|n| n * mult);
        }
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::autoscaling::v2::{
        ContainerResourceMetricStatus, ExternalMetricStatus, MetricIdentifier,
        PodsMetricStatus, ResourceMetricSource, ResourceMetricStatus,
    };

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    fn utilization(v: i32) -> MetricValueStatus {
        MetricValueStatus {
            average_utilization: Some(v),
            ..Default::default()
        }
    }

    #[test]
    fn test_extracts_each_shape() {
        let pods = MetricStatus {
            type_: "Pods".to_string(),
            pods: Some(PodsMetricStatus {
                metric: MetricIdentifier {
                    name: "queries".to_string(),
                    selector: None,
                },
                current: utilization(10),
            }),
            ..Default::default()
        };
        let external = MetricStatus {
            type_: "External".to_string(),
            external: Some(ExternalMetricStatus {
                metric: MetricIdentifier {
                    name: "lag".to_string(),
                    selector: None,
                },
                current: utilization(20),
            }),
            ..Default::default()
        };
        let resource = MetricStatus {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricStatus {
                name: "cpu".to_string(),
                current: utilization(30),
            }),
            ..Default::default()
        };
        let container = MetricStatus {
            type_: "ContainerResource".to_string(),
            container_resource: Some(ContainerResourceMetricStatus {
                container: "server".to_string(),
                name: "memory".to_string(),
                current: utilization(40),
            }),
            ..Default::default()
        };

        let got: Vec<(&str, Option<i32>)> = [&pods, &external, &resource, &container]
            .iter()
            .map(|s| {
                let m = ReportedMetric::from_status(s).unwrap();
                (m.name(), m.current().average_utilization)
            })
            .collect();
        assert_eq!(
            got,
            vec![
                ("queries", Some(10)),
                ("lag", Some(20)),
                ("cpu", Some(30)),
                ("memory", Some(40))
            ]
        );
    }

    #[test]
    fn test_unrecognized_shape_is_absent() {
        let unknown = MetricStatus {
            type_: "Custom".to_string(),
            ..Default::default()
        };
        assert!(ReportedMetric::from_status(&unknown).is_none());

        // Tag present, payload missing.
        let empty = MetricStatus {
            type_: "Resource".to_string(),
            ..Default::default()
        };
        assert!(ReportedMetric::from_status(&empty).is_none());
    }

    #[test]
    fn test_spec_metric_name() {
        let spec = MetricSpec {
            type_: "Resource".to_string(),
            resource: Some(ResourceMetricSource {
                name: "cpu".to_string(),
                target: MetricTarget::default(),
            }),
            ..Default::default()
        };
        assert_eq!(spec_metric_name(&spec), Some("cpu"));
    }

    #[test]
    fn test_compare_utilization() {
        let target = MetricTarget {
            type_: "Utilization".to_string(),
            average_utilization: Some(50),
            ..Default::default()
        };
        assert_eq!(compare(&utilization(20), &target), Comparison::Below);
        assert_eq!(compare(&utilization(50), &target), Comparison::Equal);
        assert_eq!(compare(&utilization(80), &target), Comparison::Above);
    }

    #[test]
    fn test_compare_value_and_average_value() {
        let value_target = MetricTarget {
            type_: "Value".to_string(),
            value: Some(q("1")),
            ..Default::default()
        };
        let current = MetricValueStatus {
            value: Some(q("500m")),
            ..Default::default()
        };
        assert_eq!(compare(&current, &value_target), Comparison::Below);

        let avg_target = MetricTarget {
            type_: "AverageValue".to_string(),
            average_value: Some(q("1Gi")),
            ..Default::default()
        };
        let current = MetricValueStatus {
            average_value: Some(q("2Gi")),
            ..Default::default()
        };
        assert_eq!(compare(&current, &avg_target), Comparison::Above);
    }

    #[test]
    fn test_mismatched_representation_cannot_compare() {
        let target = MetricTarget {
            type_: "AverageValue".to_string(),
            average_value: Some(q("100")),
            ..Default::default()
        };
        assert_eq!(compare(&utilization(100), &target), Comparison::CannotCompare);
    }

    #[test]
    fn test_unparsable_quantity_cannot_compare() {
        let target = MetricTarget {
            type_: "Value".to_string(),
            value: Some(q("lots")),
            ..Default::default()
        };
        let current = MetricValueStatus {
            value: Some(q("3")),
            ..Default::default()
        };
        assert_eq!(compare(&current, &target), Comparison::CannotCompare);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity(&q("10")), Some(10.0));
        assert!((parse_quantity(&q("250m")).unwrap() - 0.25).abs() < 1e-12);
        assert_eq!(parse_quantity(&q("2Ki")), Some(2048.0));
        assert_eq!(parse_quantity(&q("3k")), Some(3000.0));
        assert_eq!(parse_quantity(&q("1e3")), Some(1000.0));
        assert_eq!(parse_quantity(&q("")), None);
    }
}
