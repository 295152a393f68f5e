//! VerticaDB Custom Resource Definition
//!
//! Only the parts of the database topology the autoscaler reads or mutates
//! are modelled here: the ordered subcluster list and the k-safety level.

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Minimum primary hosts for a k-safety 0 database
pub const KSAFETY0_MIN_HOSTS: i32 = 1;
/// Minimum primary hosts for a k-safety 1 database
pub const KSAFETY1_MIN_HOSTS: i32 = 3;

/// VerticaDB is the Schema for the verticadbs API
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vertica.com",
    version = "v1",
    kind = "VerticaDB",
    namespaced,
    derive = "Default",
    derive = "PartialEq",
    shortname = "vdb",
    printcolumn = r#"{"name":"KSafety","type":"string","jsonPath":".spec.kSafety"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerticaDBSpec {
    /// Server image
    #[serde(default = "default_image")]
    pub image: String,

    /// Fault tolerance level of the database
    #[serde(default)]
    pub k_safety: KSafety,

    /// Subclusters in definition order
    #[serde(default)]
    pub subclusters: Vec<Subcluster>,
}

/// K-safety level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum KSafety {
    #[serde(rename = "0")]
    Zero,
    #[default]
    #[serde(rename = "1")]
    One,
}

/// Role of a subcluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubclusterType {
    #[default]
    Primary,
    Secondary,
}

/// A named, independently sized group of database pods.
///
/// The same shape doubles as the autoscaler's template for new subclusters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subcluster {
    #[serde(default)]
    pub name: String,

    /// Service object the subcluster is exposed through
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,

    /// Number of pods
    #[serde(default)]
    #[schemars(range(min = 0))]
    pub size: i32,

    #[serde(default)]
    pub r#type: SubclusterType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

fn default_image() -> String {
    "opentext/vertica-k8s:latest".to_string()
}

/// Convert a subcluster name into something usable as a DNS label.
pub fn fqdn_compat(name: &str) -> String {
    name.replace('_', "-")
}

impl Subcluster {
    /// Service name, falling back to the subcluster name when unset.
    pub fn service_name(&self) -> String {
        if self.service_name.is_empty() {
            fqdn_compat(&self.name)
        } else {
            self.service_name.clone()
        }
    }

    /// An empty filter matches every subcluster.
    pub fn matches_service(&self, service_name: &str) -> bool {
        service_name.is_empty() || self.service_name() == service_name
    }

    pub fn is_primary(&self) -> bool {
        self.r#type == SubclusterType::Primary
    }
}

impl VerticaDB {
    /// Indices of the subclusters bound to `service_name`, in definition
    /// order, plus their combined size.
    pub fn find_subclusters_for_service(&self, service_name: &str) -> (Vec<usize>, i32) {
        let mut total: i32 = 0;
        let indices = self
            .spec
            .subclusters
            .iter()
            .enumerate()
            .filter(|(_, sc)| sc.matches_service(service_name))
            .map(|(i, sc)| {
                total = total.saturating_add(sc.size);
                i
            })
            .collect();
        (indices, total)
    }

    pub fn subcluster_names(&self) -> BTreeSet<String> {
        self.spec.subclusters.iter().map(|sc| sc.name.clone()).collect()
    }

    /// Total number of primary hosts.
    pub fn primary_count(&self) -> i32 {
        self.spec
            .subclusters
            .iter()
            .filter(|sc| sc.is_primary())
            .fold(0, |total: i32, sc| total.saturating_add(sc.size))
    }

    pub fn is_ksafety0(&self) -> bool {
        self.spec.k_safety == KSafety::Zero
    }

    /// Fewest primary hosts the database may be left with.
    pub fn min_primary_hosts(&self) -> i32 {
        if self.is_ksafety0() {
            KSAFETY0_MIN_HOSTS
        } else {
            KSAFETY1_MIN_HOSTS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sc(name: &str, svc: &str, size: i32, r#type: SubclusterType) -> Subcluster {
        Subcluster {
            name: name.to_string(),
            service_name: svc.to_string(),
            size,
            r#type,
            ..Default::default()
        }
    }

    #[test]
    fn test_spec_defaults() {
        let json = r#"{"subclusters": [{"name": "sc1", "size": 3}]}"#;
        let spec: VerticaDBSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.k_safety, KSafety::One);
        assert_eq!(spec.subclusters[0].r#type, SubclusterType::Primary);
        assert!(spec.subclusters[0].service_name.is_empty());
    }

    #[test]
    fn test_ksafety_wire_format() {
        let spec: VerticaDBSpec = serde_json::from_str(r#"{"kSafety": "0"}"#).unwrap();
        assert_eq!(spec.k_safety, KSafety::Zero);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kSafety"], "0");
    }

    #[test]
    fn test_service_name_fallback() {
        let s = sc("my_sc", "", 1, SubclusterType::Primary);
        assert_eq!(s.service_name(), "my-sc");
        assert!(s.matches_service("my-sc"));
        assert!(s.matches_service(""));
        assert!(!s.matches_service("other"));
    }

    #[test]
    fn test_find_subclusters_for_service() {
        let vdb = VerticaDB::new(
            "v",
            VerticaDBSpec {
                subclusters: vec![
                    sc("sc1", "a", 3, SubclusterType::Primary),
                    sc("sc2", "b", 4, SubclusterType::Secondary),
                    sc("sc3", "a", 2, SubclusterType::Secondary),
                ],
                ..Default::default()
            },
        );
        let (indices, total) = vdb.find_subclusters_for_service("a");
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(total, 5);
        assert_eq!(vdb.find_subclusters_for_service("").1, 9);
        assert_eq!(vdb.primary_count(), 3);
        assert_eq!(vdb.min_primary_hosts(), KSAFETY1_MIN_HOSTS);
    }

    #[test]
    fn test_size_totals_saturate() {
        let vdb = VerticaDB::new(
            "v",
            VerticaDBSpec {
                subclusters: vec![
                    sc("sc1", "a", i32::MAX, SubclusterType::Primary),
                    sc("sc2", "a", i32::MAX, SubclusterType::Primary),
                ],
                ..Default::default()
            },
        );
        assert_eq!(vdb.find_subclusters_for_service("a").1, i32::MAX);
        assert_eq!(vdb.primary_count(), i32::MAX);
    }
}
