//! Reconciliation logic for the Verrazzano platform resource
//!
//! Tracks the state of each registered component and rolls it up into the
//! overall platform state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, instrument, warn};

use crate::component;
use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::requeue::{resync_requeue, short_requeue};
use crate::controller::status::{ConditionBuilder, condition_reasons, patch_status};
use crate::crd::{CompState, ComponentStatusDetails, Verrazzano, VerrazzanoStatus, VzState};

pub const CONTROLLER_NAME: &str = "verrazzano";

#[instrument(skip(vz, ctx), fields(name = %vz.name_any(), namespace = vz.namespace().unwrap_or_default()))]
pub async fn reconcile(vz: Arc<Verrazzano>, ctx: Arc<Context>) -> Result<Action> {
    let ns = vz.namespace().unwrap_or_default();
    let start = Instant::now();
    let result = reconcile_components(&vz, &ctx, &ns).await;
    ctx.record_reconcile(
        CONTROLLER_NAME,
        &ns,
        start.elapsed().as_secs_f64(),
        result.is_ok(),
    );
    result
}

pub fn error_policy(vz: Arc<Verrazzano>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(name = %vz.name_any(), "Verrazzano reconcile failed: {}", error);
    short_requeue()
}

/// State of a component given whether it is enabled and ready
pub fn component_state(enabled: bool, ready: bool) -> CompState {
    match (enabled, ready) {
        (false, _) => CompState::Disabled,
        (true, true) => CompState::Ready,
        (true, false) => CompState::Reconciling,
    }
}

/// Update one component's status entry, keeping its generation bookkeeping
pub fn component_details(
    existing: Option<&ComponentStatusDetails>,
    name: &str,
    state: CompState,
    generation: i64,
) -> ComponentStatusDetails {
    let mut details = existing.cloned().unwrap_or_else(|| ComponentStatusDetails {
        name: name.to_string(),
        ..Default::default()
    });
    match state {
        CompState::Ready => details.last_reconciled_generation = generation,
        CompState::Reconciling => details.reconciling_generation = generation,
        _ => {}
    }
    details.state = state;
    details
}

/// Overall state: ready once every enabled component is ready
pub fn overall_state(components: &BTreeMap<String, ComponentStatusDetails>) -> VzState {
    if components
        .values()
        .all(|c| matches!(c.state, CompState::Ready | CompState::Disabled))
    {
        VzState::Ready
    } else {
        VzState::Reconciling
    }
}

async fn reconcile_components(vz: &Verrazzano, ctx: &Context, ns: &str) -> Result<Action> {
    let client = &ctx.client;
    let existing = vz.status.clone().unwrap_or_default();
    let generation = vz.metadata.generation.unwrap_or_default();

    let mut components = BTreeMap::new();
    for comp in component::registry() {
        let enabled = comp.is_enabled(vz);
        let ready = enabled && component::is_ready(client, *comp).await?;
        if enabled && comp.name() == "oam-kubernetes-runtime" {
            component::ensure_oam_cluster_roles(client).await?;
        }
        let state = component_state(enabled, ready);
        debug!(component = comp.name(), %state, "Component state");
        components.insert(
            comp.name().to_string(),
            component_details(existing.components.get(comp.name()), comp.name(), state, generation),
        );
    }

    let state = overall_state(&components);
    let pending: Vec<&str> = components
        .values()
        .filter(|c| c.state == CompState::Reconciling)
        .map(|c| c.name.as_str())
        .collect();
    let conditions = if pending.is_empty() {
        ConditionBuilder::from_existing(existing.conditions.clone()).ready(
            true,
            condition_reasons::COMPONENTS_READY,
            "All enabled components are ready",
        )
    } else {
        ConditionBuilder::from_existing(existing.conditions.clone()).ready(
            false,
            condition_reasons::COMPONENTS_PENDING,
            &format!("Waiting for components: {}", pending.join(", ")),
        )
    }
    .build();

    let status = VerrazzanoStatus {
        state: Some(state),
        conditions,
        components,
    };
    if vz.status.as_ref() != Some(&status) {
        let api: Api<Verrazzano> = Api::namespaced(client.clone(), ns);
        patch_status(&api, &vz.name_any(), &status).await?;
    }

    Ok(if state == VzState::Ready {
        resync_requeue()
    } else {
        short_requeue()
    })
}
