//! Pod annotations that advertise metrics endpoints to the scraper

use std::collections::BTreeMap;

use kube::api::{Patch, PatchParams};
use kube::ResourceExt;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::defaults::ResolvedPort;
use super::workload::{ResourceResolver, Workload, fetch};
use crate::controller::error::Result;
use crate::controller::status::FIELD_MANAGER;
use crate::crd::QualifiedResourceRelation;

pub const METRICS_ENABLED_ANNOTATION: &str = "verrazzano.io/metricsEnabled";
pub const METRICS_PATH_ANNOTATION: &str = "verrazzano.io/metricsPath";
pub const METRICS_PORT_ANNOTATION: &str = "verrazzano.io/metricsPort";

/// Prefix shared by every metrics annotation, indexed or not
pub const METRICS_ANNOTATION_PREFIX: &str = "verrazzano.io/metrics";

pub const OAM_APP_LABEL: &str = "app.oam.dev/name";
pub const OAM_COMPONENT_LABEL: &str = "app.oam.dev/component";

/// Where the metrics annotations of a child live
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationTarget {
    /// `spec.template.metadata` of a pod controller
    PodTemplate,
    /// The object's own metadata
    Object,
    /// Recorded but never mutated
    Untouched,
}

pub fn mutation_target(kind: &str) -> MutationTarget {
    match kind {
        "Deployment" | "StatefulSet" | "ReplicaSet" | "DaemonSet" => MutationTarget::PodTemplate,
        "Pod" => MutationTarget::Object,
        _ => MutationTarget::Untouched,
    }
}

/// Annotation key for the port at `index`; the first port has no suffix
pub fn annotation_key(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{base}{index}")
    }
}

/// Annotations describing every resolved port
pub fn desired_annotations(enabled: bool, ports: &[ResolvedPort]) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::new();
    for (i, port) in ports.iter().enumerate() {
        annotations.insert(
            annotation_key(METRICS_ENABLED_ANNOTATION, i),
            enabled.to_string(),
        );
        annotations.insert(annotation_key(METRICS_PATH_ANNOTATION, i), port.path.clone());
        annotations.insert(
            annotation_key(METRICS_PORT_ANNOTATION, i),
            port.port.to_string(),
        );
    }
    annotations
}

/// OAM labels of the trait that should be copied to pod templates
pub fn desired_labels(trait_labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    [OAM_APP_LABEL, OAM_COMPONENT_LABEL]
        .into_iter()
        .filter_map(|key| trait_labels.get(key).map(|v| (key.to_string(), v.clone())))
        .collect()
}

/// Annotation and label maps currently carried by a child
pub fn current_metadata(child: &Workload) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    match mutation_target(&child.kind) {
        MutationTarget::PodTemplate => (
            string_map(child.field(&["spec", "template", "metadata", "annotations"])),
            string_map(child.field(&["spec", "template", "metadata", "labels"])),
        ),
        MutationTarget::Object => (
            child.object.annotations().clone(),
            child.object.labels().clone(),
        ),
        MutationTarget::Untouched => (BTreeMap::new(), BTreeMap::new()),
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Merge-patch entries needed to move `current` to `desired`.
///
/// Metrics annotations present on the object but not desired are nulled
/// out so that shrinking the port list leaves no stale indices.
fn annotation_changes(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Map<String, Value> {
    let mut changes = Map::new();
    for (key, value) in desired {
        if current.get(key) != Some(value) {
            changes.insert(key.clone(), Value::String(value.clone()));
        }
    }
    for key in current.keys() {
        if key.starts_with(METRICS_ANNOTATION_PREFIX) && !desired.contains_key(key) {
            changes.insert(key.clone(), Value::Null);
        }
    }
    changes
}

fn label_changes(current: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> Map<String, Value> {
    desired
        .iter()
        .filter(|(k, v)| current.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

fn wrap_metadata(target: MutationTarget, metadata: Map<String, Value>) -> Option<Value> {
    if metadata.is_empty() {
        return None;
    }
    match target {
        MutationTarget::PodTemplate => Some(json!({ "spec": { "template": { "metadata": metadata } } })),
        MutationTarget::Object => Some(json!({ "metadata": metadata })),
        MutationTarget::Untouched => None,
    }
}

/// Build the merge patch applying the metrics annotations, `None` if nothing changes
pub fn metrics_patch(
    child: &Workload,
    annotations: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> Option<Value> {
    let target = mutation_target(&child.kind);
    let (current_annotations, current_labels) = current_metadata(child);

    let mut metadata = Map::new();
    let annotation_patch = annotation_changes(&current_annotations, annotations);
    if !annotation_patch.is_empty() {
        metadata.insert("annotations".to_string(), Value::Object(annotation_patch));
    }
    if target == MutationTarget::PodTemplate {
        let label_patch = label_changes(&current_labels, labels);
        if !label_patch.is_empty() {
            metadata.insert("labels".to_string(), Value::Object(label_patch));
        }
    }
    wrap_metadata(target, metadata)
}

/// Build the merge patch removing every metrics annotation, `None` if there are none
pub fn removal_patch(child: &Workload) -> Option<Value> {
    let target = mutation_target(&child.kind);
    let (current_annotations, _) = current_metadata(child);
    let removals = annotation_changes(&current_annotations, &BTreeMap::new());
    if removals.is_empty() {
        return None;
    }
    let mut metadata = Map::new();
    metadata.insert("annotations".to_string(), Value::Object(removals));
    wrap_metadata(target, metadata)
}

async fn apply_patch(resolver: &ResourceResolver, child: &Workload, patch: &Value) -> Result<()> {
    let api = resolver
        .namespaced_api(&child.api_version, &child.kind, &child.namespace())
        .await?;
    api.patch(
        &child.name(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

/// Apply metrics annotations and OAM labels to a child, returning whether it was patched
pub async fn update_child(
    resolver: &ResourceResolver,
    child: &Workload,
    annotations: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> Result<bool> {
    let Some(patch) = metrics_patch(child, annotations, labels) else {
        debug!(kind = %child.kind, name = %child.name(), "Metrics annotations up to date");
        return Ok(false);
    };
    apply_patch(resolver, child, &patch).await?;
    info!(kind = %child.kind, name = %child.name(), "Updated metrics annotations");
    Ok(true)
}

/// Strip metrics annotations from a resource recorded in trait status.
///
/// Resources that no longer exist are skipped.
pub async fn remove_from_resource(
    resolver: &ResourceResolver,
    resource: &QualifiedResourceRelation,
) -> Result<()> {
    if mutation_target(&resource.kind) == MutationTarget::Untouched {
        return Ok(());
    }
    let Some(child) = fetch(
        resolver,
        &resource.api_version,
        &resource.kind,
        &resource.namespace,
        &resource.name,
    )
    .await?
    else {
        debug!(kind = %resource.kind, name = %resource.name, "Resource already gone");
        return Ok(());
    };
    if let Some(patch) = removal_patch(&child) {
        apply_patch(resolver, &child, &patch).await?;
        info!(kind = %resource.kind, name = %resource.name, "Removed metrics annotations");
    }
    Ok(())
}
