//! Workload lookup for MetricsTrait
//!
//! Workloads are arbitrary third-party resources, so they are read
//! untyped through `DynamicObject`.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::core::TypeMeta;
use kube::{Api, Client, ResourceExt, discovery};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::{WorkloadDefinition, split_api_version};

pub const VERRAZZANO_COHERENCE_WORKLOAD: &str = "VerrazzanoCoherenceWorkload";
pub const VERRAZZANO_WEBLOGIC_WORKLOAD: &str = "VerrazzanoWebLogicWorkload";

/// Workload families with distinct metrics defaults
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadType {
    WebLogic,
    Coherence,
    Generic,
}

impl std::fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadType::WebLogic => write!(f, "weblogic"),
            WorkloadType::Coherence => write!(f, "coherence"),
            WorkloadType::Generic => write!(f, "generic"),
        }
    }
}

/// Classify a workload by API version and kind.
///
/// Any version of a supported group matches; the core group never does.
pub fn supported_workload_type(api_version: &str, kind: &str) -> Option<WorkloadType> {
    let (group, version) = api_version.split_once('/')?;
    if version.is_empty() {
        return None;
    }
    match (group, kind) {
        ("weblogic.oracle", "Domain") => Some(WorkloadType::WebLogic),
        ("coherence.oracle.com", "Coherence") => Some(WorkloadType::Coherence),
        ("oam.verrazzano.io", "VerrazzanoHelidonWorkload") => Some(WorkloadType::Generic),
        ("core.oam.dev", "ContainerizedWorkload") => Some(WorkloadType::Generic),
        ("apps", "Deployment") => Some(WorkloadType::Generic),
        _ => None,
    }
}

/// An untyped object together with its type information
#[derive(Clone, Debug)]
pub struct Workload {
    pub api_version: String,
    pub kind: String,
    pub object: DynamicObject,
}

impl Workload {
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>, object: DynamicObject) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            object,
        }
    }

    pub fn name(&self) -> String {
        self.object.name_any()
    }

    pub fn namespace(&self) -> String {
        self.object.namespace().unwrap_or_default()
    }

    pub fn uid(&self) -> Option<String> {
        self.object.metadata.uid.clone()
    }

    /// Read a nested field of the object body
    pub fn field(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.object.data, |value, key| value.get(key))
    }
}

/// Maps workload types to API resources.
///
/// Built-in kinds are known statically. Any other kind is resolved once
/// through API discovery, since CRD plurals cannot be derived from the kind.
#[derive(Clone)]
pub struct ResourceResolver {
    client: Client,
    cache: Arc<RwLock<HashMap<GroupVersionKind, ApiResource>>>,
}

impl ResourceResolver {
    pub fn new(client: Client) -> Self {
        let builtin = [
            ApiResource::erase::<Deployment>(&()),
            ApiResource::erase::<StatefulSet>(&()),
            ApiResource::erase::<ReplicaSet>(&()),
            ApiResource::erase::<DaemonSet>(&()),
            ApiResource::erase::<Pod>(&()),
            ApiResource::erase::<Service>(&()),
            ApiResource::erase::<Job>(&()),
        ];
        let cache = builtin
            .into_iter()
            .map(|ar| (GroupVersionKind::gvk(&ar.group, &ar.version, &ar.kind), ar))
            .collect();
        Self {
            client,
            cache: Arc::new(RwLock::new(cache)),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Resolve a type, asking the API server the first time it is seen
    pub async fn resolve(&self, api_version: &str, kind: &str) -> Result<ApiResource> {
        let (group, version) = split_api_version(api_version);
        let gvk = GroupVersionKind::gvk(group, version, kind);
        if let Some(ar) = self.cache.read().await.get(&gvk) {
            return Ok(ar.clone());
        }

        let (ar, _caps) = discovery::pinned_kind(&self.client, &gvk).await?;
        debug!(%api_version, %kind, plural = %ar.plural, "Discovered resource");
        self.cache.write().await.insert(gvk, ar.clone());
        Ok(ar)
    }

    /// Namespaced untyped API for the given type
    pub async fn namespaced_api(&self, api_version: &str, kind: &str, ns: &str) -> Result<Api<DynamicObject>> {
        let ar = self.resolve(api_version, kind).await?;
        Ok(Api::namespaced_with(self.client.clone(), ns, &ar))
    }
}

/// Fetch an object by type and name, `None` when it does not exist
pub async fn fetch(
    resolver: &ResourceResolver,
    api_version: &str,
    kind: &str,
    ns: &str,
    name: &str,
) -> Result<Option<Workload>> {
    let api = resolver.namespaced_api(api_version, kind, ns).await?;
    Ok(api
        .get_opt(name)
        .await?
        .map(|object| Workload::new(api_version, kind, object)))
}

/// Type and name of the resource wrapped by a Verrazzano workload
pub fn contained_reference(wrapper: &Workload) -> Option<(String, String, String)> {
    let (default_api_version, default_kind) = match wrapper.kind.as_str() {
        VERRAZZANO_WEBLOGIC_WORKLOAD => ("weblogic.oracle/v8", "Domain"),
        VERRAZZANO_COHERENCE_WORKLOAD => ("coherence.oracle.com/v1", "Coherence"),
        _ => return None,
    };
    let template = wrapper.field(&["spec", "template"]);
    let text = |key: &str| {
        template
            .and_then(|t| t.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let api_version = text("apiVersion").unwrap_or_else(|| default_api_version.to_string());
    let kind = text("kind").unwrap_or_else(|| default_kind.to_string());
    let name = template
        .and_then(|t| t.pointer("/metadata/name"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| wrapper.name());
    Some((api_version, kind, name))
}

/// Replace a Verrazzano wrapper workload with the resource it contains
pub async fn unwrap_workload(resolver: &ResourceResolver, workload: Workload) -> Result<Workload> {
    let Some((api_version, kind, name)) = contained_reference(&workload) else {
        return Ok(workload);
    };
    let ns = workload.namespace();
    debug!(wrapper = %workload.kind, %kind, %name, "Unwrapping workload");
    fetch(resolver, &api_version, &kind, &ns, &name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("{kind} {ns}/{name}")))
}

/// Name of the WorkloadDefinition registered for a workload type
pub fn workload_definition_name(api_version: &str, kind: &str) -> String {
    let (group, _) = split_api_version(api_version);
    let plural = format!("{}s", kind.to_lowercase());
    if group.is_empty() {
        plural
    } else {
        format!("{plural}.{group}")
    }
}

/// True when `object` is the workload itself or is owned by it
pub fn is_child_of(object: &DynamicObject, workload_uid: &str) -> bool {
    if object.metadata.uid.as_deref() == Some(workload_uid) {
        return true;
    }
    object
        .metadata
        .owner_references
        .as_ref()
        .is_some_and(|refs| refs.iter().any(|r| r.uid == workload_uid))
}

/// Find the resources created for a workload.
///
/// Child kinds come from the workload's definition. Without a definition a
/// Deployment or StatefulSet workload is its own only child.
pub async fn fetch_workload_children(
    resolver: &ResourceResolver,
    workload: &Workload,
) -> Result<Vec<Workload>> {
    let definitions: Api<WorkloadDefinition> = Api::all(resolver.client().clone());
    let definition_name = workload_definition_name(&workload.api_version, &workload.kind);

    let Some(definition) = definitions.get_opt(&definition_name).await? else {
        debug!(definition = %definition_name, "No workload definition found");
        return Ok(match workload.kind.as_str() {
            "Deployment" | "StatefulSet" => vec![workload.clone()],
            _ => Vec::new(),
        });
    };

    let Some(uid) = workload.uid() else {
        return Err(Error::MissingObjectKey("metadata.uid"));
    };
    let ns = workload.namespace();

    let mut children = Vec::new();
    for child_kind in &definition.spec.child_resource_kinds {
        let api = resolver
            .namespaced_api(&child_kind.api_version, &child_kind.kind, &ns)
            .await?;
        let mut params = ListParams::default();
        if let Some(selector) = child_kind.label_selector() {
            params = params.labels(&selector);
        }
        let list = api.list(&params).await?;
        children.extend(
            list.items
                .into_iter()
                .filter(|object| is_child_of(object, &uid))
                .map(|mut object| {
                    object.types = Some(TypeMeta {
                        api_version: child_kind.api_version.clone(),
                        kind: child_kind.kind.clone(),
                    });
                    Workload::new(&child_kind.api_version, &child_kind.kind, object)
                }),
        );
    }
    Ok(children)
}
