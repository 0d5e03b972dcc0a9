//! Watches ConfigMaps and Secrets referenced as Helm value overrides
//!
//! When an override source of a monitored component changes, the
//! component's status is reset so the platform reconciler reinstalls it.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::{Api, Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::component;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::requeue::short_requeue;
use crate::controller::status::patch_status;
use crate::crd::{CompState, ComponentStatusDetails, Overrides, Verrazzano};

pub const CONTROLLER_NAME: &str = "helmoverrides";

/// Kinds of objects that can hold Helm overrides
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverrideKind {
    ConfigMap,
    Secret,
}

impl OverrideKind {
    fn references(self, overrides: &Overrides, name: &str) -> bool {
        let selector = match self {
            OverrideKind::ConfigMap => overrides.config_map_ref.as_ref(),
            OverrideKind::Secret => overrides.secret_ref.as_ref(),
        };
        selector.is_some_and(|s| s.name == name)
    }
}

/// Name of the first monitored component whose overrides reference the object
pub fn vz_contains_resource(vz: &Verrazzano, kind: OverrideKind, name: &str) -> Option<&'static str> {
    component::registry()
        .iter()
        .filter(|c| c.monitor_overrides(vz))
        .find(|c| c.overrides(vz).iter().any(|o| kind.references(o, name)))
        .map(|c| c.name())
}

/// Status entry that sends a component back through install
pub fn reset_component_status(vz: &Verrazzano, component_name: &str) -> ComponentStatusDetails {
    let mut details = vz
        .status
        .as_ref()
        .and_then(|s| s.components.get(component_name).cloned())
        .unwrap_or_else(|| ComponentStatusDetails {
            name: component_name.to_string(),
            ..Default::default()
        });
    details.reconciling_generation = 0;
    details.last_reconciled_generation = 0;
    details.state = CompState::Ready;
    details
}

#[instrument(skip(cm, ctx), fields(name = %cm.name_any(), namespace = cm.namespace().unwrap_or_default()))]
pub async fn reconcile_config_map(cm: Arc<ConfigMap>, ctx: Arc<Context>) -> Result<Action> {
    reconcile_override_source(cm.as_ref(), OverrideKind::ConfigMap, &ctx).await
}

#[instrument(skip(secret, ctx), fields(name = %secret.name_any(), namespace = secret.namespace().unwrap_or_default()))]
pub async fn reconcile_secret(secret: Arc<Secret>, ctx: Arc<Context>) -> Result<Action> {
    reconcile_override_source(secret.as_ref(), OverrideKind::Secret, &ctx).await
}

pub fn error_policy<K: Resource>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(name = %obj.meta().name.as_deref().unwrap_or_default(), "Helm override reconcile failed: {}", error);
    short_requeue()
}

async fn reconcile_override_source<K: Resource>(obj: &K, kind: OverrideKind, ctx: &Context) -> Result<Action> {
    let ns = obj.meta().namespace.clone().unwrap_or_default();
    let start = Instant::now();
    let result = reset_referencing_component(obj, kind, ctx, &ns).await;
    ctx.record_reconcile(
        CONTROLLER_NAME,
        &ns,
        start.elapsed().as_secs_f64(),
        result.is_ok(),
    );
    result.map(|_| Action::await_change())
}

async fn reset_referencing_component<K: Resource>(obj: &K, kind: OverrideKind, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<Verrazzano> = Api::all(ctx.client.clone());
    let vzs = api.list(&ListParams::default()).await?;
    let Some(vz) = vzs.items.first() else {
        debug!("No Verrazzano resource found");
        return Ok(());
    };
    if vz.namespace().as_deref() != Some(ns) {
        return Ok(());
    }
    let name = obj.meta().name.clone().unwrap_or_default();
    let Some(component_name) = vz_contains_resource(vz, kind, &name) else {
        return Ok(());
    };

    let details = reset_component_status(vz, component_name);
    let vz_api: Api<Verrazzano> = Api::namespaced(ctx.client.clone(), ns);
    patch_status(
        &vz_api,
        &vz.name_any(),
        &serde_json::json!({ "components": { (component_name): details } }),
    )
    .await?;
    info!(component = component_name, source = %name, ?kind, "Reset component for override change");
    Ok(())
}
