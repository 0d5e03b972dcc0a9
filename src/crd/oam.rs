//! Minimal OAM runtime types read by the application reconcilers

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// WorkloadDefinition registers a workload kind and the kinds it creates
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "core.oam.dev",
    version = "v1alpha2",
    kind = "WorkloadDefinition",
    plural = "workloaddefinitions"
)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDefinitionSpec {
    pub definition_ref: DefinitionReference,

    /// Kinds of resources created by workloads of this definition
    #[serde(default)]
    pub child_resource_kinds: Vec<ChildResourceKind>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionReference {
    pub name: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChildResourceKind {
    pub api_version: String,
    pub kind: String,

    /// Equality label selector applied when listing children
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<BTreeMap<String, String>>,
}

impl ChildResourceKind {
    /// Render the selector as a `k=v,k=v` label selector string
    pub fn label_selector(&self) -> Option<String> {
        self.selector.as_ref().filter(|s| !s.is_empty()).map(|s| {
            s.iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(",")
        })
    }
}

/// ContainerizedWorkload is the OAM core workload; only its metadata is read
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "core.oam.dev",
    version = "v1alpha2",
    kind = "ContainerizedWorkload",
    plural = "containerizedworkloads",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerizedWorkloadSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,

    #[serde(default)]
    pub containers: Vec<serde_json::Value>,
}
