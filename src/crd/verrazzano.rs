use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::Condition;

/// Verrazzano is the platform installation resource
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema, Default)]
#[kube(
    group = "install.verrazzano.io",
    version = "v1alpha1",
    kind = "Verrazzano",
    plural = "verrazzanos",
    shortname = "vz",
    namespaced,
    status = "VerrazzanoStatus",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VerrazzanoSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_name: Option<String>,

    #[serde(default)]
    pub components: ComponentSpec,
}

/// Per-component configuration
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_manager: Option<ComponentConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio: Option<ComponentConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oam: Option<ComponentConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence_operator: Option<ComponentConfig>,
}

/// Settings shared by every installable component
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Watch override sources and re-run the component install when they change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_changes: Option<bool>,

    /// Helm value override sources, applied in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overrides: Vec<Overrides>,
}

/// One source of Helm value overrides
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map_ref: Option<KeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<KeySelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Value>,
}

/// Selects a key of a ConfigMap or Secret
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeySelector {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Observed state of the platform installation
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerrazzanoStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<VzState>,

    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Status of each component keyed by component name
    #[serde(default)]
    pub components: BTreeMap<String, ComponentStatusDetails>,
}

/// Overall platform state
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum VzState {
    Reconciling,
    Ready,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatusDetails {
    pub name: String,

    #[serde(default)]
    pub state: CompState,

    #[serde(default)]
    pub last_reconciled_generation: i64,

    #[serde(default)]
    pub reconciling_generation: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Lifecycle state of a single component
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum CompState {
    #[default]
    PreInstalling,
    Disabled,
    Reconciling,
    Ready,
    Failed,
}

impl std::fmt::Display for CompState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompState::PreInstalling => write!(f, "PreInstalling"),
            CompState::Disabled => write!(f, "Disabled"),
            CompState::Reconciling => write!(f, "Reconciling"),
            CompState::Ready => write!(f, "Ready"),
            CompState::Failed => write!(f, "Failed"),
        }
    }
}
