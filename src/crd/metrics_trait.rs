use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{Condition, QualifiedResourceRelation, TypedReference};

/// MetricsTrait enables Prometheus scraping of the pods backing an OAM workload
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "oam.verrazzano.io",
    version = "v1alpha1",
    kind = "MetricsTrait",
    plural = "metricstraits",
    namespaced,
    status = "MetricsTraitStatus",
    printcolumn = r#"{"name":"Workload", "type":"string", "jsonPath":".spec.workloadRef.name"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MetricsTraitSpec {
    /// The workload this trait is applied to
    pub workload_ref: TypedReference,

    /// Whether metrics scraping is enabled (absent means enabled)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Metrics port for the first scrape target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Metrics path for the first scrape target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Additional scrape targets
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,

    /// Secret holding basic auth credentials for the metrics endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Prometheus deployment in `namespace/name` form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scraper: Option<String>,
}

/// A single metrics endpoint
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Observed state of a MetricsTrait
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsTraitStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Resources touched by the trait (workload children and the scraper)
    #[serde(default)]
    pub resources: Vec<QualifiedResourceRelation>,
}

impl MetricsTrait {
    /// Scraping is on unless explicitly disabled
    pub fn is_enabled(&self) -> bool {
        self.spec.enabled.unwrap_or(true)
    }

    /// Resources recorded in status with the given role
    pub fn related_resources(&self, role: &str) -> Vec<QualifiedResourceRelation> {
        self.status
            .as_ref()
            .map(|s| {
                s.resources
                    .iter()
                    .filter(|r| r.role == role)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
