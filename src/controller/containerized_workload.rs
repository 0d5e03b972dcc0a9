//! Restart propagation for ContainerizedWorkloads
//!
//! Setting `verrazzano.io/restart-version` on a ContainerizedWorkload rolls
//! the Deployments created for it by copying the annotation onto their pod
//! templates.

use std::sync::Arc;
use std::time::Instant;

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::metrics_trait::KUBE_SYSTEM_NAMESPACE;
use crate::controller::metrics_trait::annotations::{OAM_APP_LABEL, OAM_COMPONENT_LABEL};
use crate::controller::requeue::short_requeue;
use crate::controller::status::FIELD_MANAGER;
use crate::crd::ContainerizedWorkload;

pub const RESTART_VERSION_ANNOTATION: &str = "verrazzano.io/restart-version";

pub const CONTROLLER_NAME: &str = "containerizedworkload";

#[instrument(skip(workload, ctx), fields(name = %workload.name_any(), namespace = workload.namespace().unwrap_or_default()))]
pub async fn reconcile(workload: Arc<ContainerizedWorkload>, ctx: Arc<Context>) -> Result<Action> {
    let ns = workload.namespace().unwrap_or_default();
    if ns == KUBE_SYSTEM_NAMESPACE {
        return Ok(Action::await_change());
    }

    let start = Instant::now();
    let result = restart_deployments(&workload, &ctx, &ns).await;
    ctx.record_reconcile(
        CONTROLLER_NAME,
        &ns,
        start.elapsed().as_secs_f64(),
        result.is_ok(),
    );
    result.map(|_| Action::await_change())
}

pub fn error_policy(workload: Arc<ContainerizedWorkload>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(name = %workload.name_any(), "ContainerizedWorkload reconcile failed: {}", error);
    short_requeue()
}

/// Label selector matching the Deployments created for a workload
pub fn deployment_selector(workload: &ContainerizedWorkload) -> Option<String> {
    let labels = workload.labels();
    let component = labels.get(OAM_COMPONENT_LABEL)?;
    let app = labels.get(OAM_APP_LABEL)?;
    Some(format!("{OAM_COMPONENT_LABEL}={component},{OAM_APP_LABEL}={app}"))
}

/// Restart version requested on the workload, if any
pub fn restart_version(workload: &ContainerizedWorkload) -> Option<&str> {
    workload
        .annotations()
        .get(RESTART_VERSION_ANNOTATION)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn template_restart_version(deployment: &Deployment) -> Option<&str> {
    deployment
        .spec
        .as_ref()?
        .template
        .metadata
        .as_ref()?
        .annotations
        .as_ref()?
        .get(RESTART_VERSION_ANNOTATION)
        .map(String::as_str)
}

async fn restart_deployments(workload: &ContainerizedWorkload, ctx: &Context, ns: &str) -> Result<()> {
    let Some(version) = restart_version(workload) else {
        debug!("No restart version requested");
        return Ok(());
    };
    let Some(selector) = deployment_selector(workload) else {
        debug!("Workload has no OAM labels, nothing to restart");
        return Ok(());
    };

    let api: Api<Deployment> = Api::namespaced(ctx.client.clone(), ns);
    let deployments = api.list(&ListParams::default().labels(&selector)).await?;
    for deployment in deployments {
        if template_restart_version(&deployment) == Some(version) {
            continue;
        }
        let patch = serde_json::json!({
            "spec": { "template": { "metadata": { "annotations": {
                (RESTART_VERSION_ANNOTATION): version
            } } } }
        });
        api.patch(
            &deployment.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;
        info!(deployment = %deployment.name_any(), %version, "Restarted deployment");
    }
    Ok(())
}
