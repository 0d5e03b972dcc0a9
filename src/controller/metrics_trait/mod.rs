//! Reconciliation logic for MetricsTrait resources
//!
//! A MetricsTrait makes the pods of an OAM workload scrapeable: the pods
//! are annotated with their metrics endpoints and the scraper's Prometheus
//! configuration gets one job per endpoint. Deleting the trait reverses
//! both.

pub mod annotations;
pub mod defaults;
pub mod scrape_config;
pub mod workload;

use std::sync::Arc;
use std::time::Instant;

use kube::api::{DeleteParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::requeue::{resync_requeue, short_requeue};
use crate::controller::status::{ConditionBuilder, FIELD_MANAGER, patch_status};
use crate::crd::{MetricsTrait, MetricsTraitStatus, QualifiedResourceRelation};

use annotations::{OAM_APP_LABEL, OAM_COMPONENT_LABEL};
use scrape_config::JobParams;
use workload::Workload;

/// Finalizer guarding removal of annotations and scrape jobs
pub const FINALIZER: &str = "metricstrait.finalizers.verrazzano.io";

/// Controller name used in logs and metrics
pub const CONTROLLER_NAME: &str = "metricstrait";

pub const SOURCE_ROLE: &str = "source";
pub const SCRAPER_ROLE: &str = "scraper";

pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";

/// Main reconciliation function
#[instrument(skip(mt, ctx), fields(name = %mt.name_any(), namespace = mt.namespace().unwrap_or_default()))]
pub async fn reconcile(mt: Arc<MetricsTrait>, ctx: Arc<Context>) -> Result<Action> {
    let ns = mt.namespace().unwrap_or_default();

    if ns == KUBE_SYSTEM_NAMESPACE {
        debug!("Ignoring MetricsTrait in {}", KUBE_SYSTEM_NAMESPACE);
        return Ok(Action::await_change());
    }

    let start = Instant::now();
    let result = if mt.metadata.deletion_timestamp.is_some() {
        reconcile_trait_delete(&mt, &ctx, &ns).await
    } else {
        reconcile_trait_create_or_update(&mt, &ctx, &ns).await
    };
    ctx.record_reconcile(
        CONTROLLER_NAME,
        &ns,
        start.elapsed().as_secs_f64(),
        result.is_ok(),
    );
    result
}

/// Error policy for the controller
pub fn error_policy(mt: Arc<MetricsTrait>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(
        name = %mt.name_any(),
        retryable = error.is_retryable(),
        "MetricsTrait reconcile failed: {}", error
    );
    short_requeue()
}

fn has_finalizer(mt: &MetricsTrait) -> bool {
    mt.finalizers().iter().any(|f| f == FINALIZER)
}

async fn add_finalizer(mt: &MetricsTrait, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<MetricsTrait> = Api::namespaced(ctx.client.clone(), ns);
    let mut finalizers = mt.finalizers().to_vec();
    finalizers.push(FINALIZER.to_string());

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(
        &mt.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;

    info!("Added finalizer to {}", mt.name_any());
    Ok(())
}

async fn remove_finalizer(mt: &MetricsTrait, ctx: &Context, ns: &str) -> Result<()> {
    let api: Api<MetricsTrait> = Api::namespaced(ctx.client.clone(), ns);
    let finalizers: Vec<String> = mt
        .finalizers()
        .iter()
        .filter(|f| *f != FINALIZER)
        .cloned()
        .collect();

    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    match api
        .patch(
            &mt.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
    {
        Ok(_) => {}
        Err(e) if crate::controller::error::is_kube_not_found(&e) => {}
        Err(e) => return Err(e.into()),
    }

    info!("Removed finalizer from {}", mt.name_any());
    Ok(())
}

/// Everything a successful pass learned about the trait's targets
#[derive(Default)]
struct SyncOutcome {
    resources: Vec<QualifiedResourceRelation>,
}

fn relation(api_version: &str, kind: &str, namespace: &str, name: &str, role: &str) -> QualifiedResourceRelation {
    QualifiedResourceRelation {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        role: role.to_string(),
    }
}

/// App and component names from the trait's OAM labels
fn oam_names(mt: &MetricsTrait) -> (String, String) {
    let labels = mt.labels();
    (
        labels.get(OAM_APP_LABEL).cloned().unwrap_or_default(),
        labels.get(OAM_COMPONENT_LABEL).cloned().unwrap_or_default(),
    )
}

/// Base scrape job name of a trait
pub fn trait_job_base(mt: &MetricsTrait) -> String {
    let (app, component) = oam_names(mt);
    scrape_config::job_base_name(&app, &mt.namespace().unwrap_or_default(), &component)
}

fn scraper_ref(mt: &MetricsTrait, ctx: &Context) -> String {
    mt.spec
        .scraper
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| ctx.config.default_scraper.clone())
}

/// Create or update the annotations and scrape jobs for a trait.
///
/// Step failures are recorded in the trait status and turn into a short
/// requeue rather than an error.
async fn reconcile_trait_create_or_update(mt: &MetricsTrait, ctx: &Context, ns: &str) -> Result<Action> {
    if !has_finalizer(mt) {
        add_finalizer(mt, ctx, ns).await?;
    }

    let client = &ctx.client;
    let workload_ref = &mt.spec.workload_ref;
    let Some(raw) = workload::fetch(
        &ctx.resolver,
        &workload_ref.api_version,
        &workload_ref.kind,
        ns,
        &workload_ref.name,
    )
    .await?
    else {
        warn!(
            kind = %workload_ref.kind,
            workload = %workload_ref.name,
            "Workload not found"
        );
        update_status(mt, ctx, ns, Err(format!("workload {} not found", workload_ref.name))).await?;
        return Ok(short_requeue());
    };
    let wrapper_kind = raw.kind.clone();
    let target = workload::unwrap_workload(&ctx.resolver, raw).await?;

    let Some(workload_type) = workload::supported_workload_type(&target.api_version, &target.kind) else {
        info!(
            api_version = %target.api_version,
            kind = %target.kind,
            "Unsupported workload type, deleting trait"
        );
        let api: Api<MetricsTrait> = Api::namespaced(client.clone(), ns);
        match api.delete(&mt.name_any(), &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if crate::controller::error::is_kube_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(Action::await_change());
    };
    debug!(%workload_type, kind = %target.kind, "Resolved workload");

    let outcome = sync_trait(mt, ctx, ns, &wrapper_kind, &target, workload_type).await;
    let action = if outcome.is_ok() {
        resync_requeue()
    } else {
        short_requeue()
    };
    if let Err(e) = &outcome {
        warn!("Failed to update metrics for trait: {}", e);
    }
    update_status(mt, ctx, ns, outcome.map_err(|e| e.to_string())).await?;
    Ok(action)
}

/// Annotate workload children and update the scraper configuration
async fn sync_trait(
    mt: &MetricsTrait,
    ctx: &Context,
    ns: &str,
    wrapper_kind: &str,
    target: &Workload,
    workload_type: workload::WorkloadType,
) -> Result<SyncOutcome> {
    let client = &ctx.client;
    let trait_defaults = defaults::trait_defaults(workload_type, target);
    let ports = defaults::resolve_ports(&mt.spec, &trait_defaults);
    let enabled = mt.is_enabled();

    let scraper = scrape_config::fetch_scraper(client, &scraper_ref(mt, ctx)).await?;

    let children = workload::fetch_workload_children(&ctx.resolver, target).await?;
    let desired_annotations = annotations::desired_annotations(enabled, &ports);
    let desired_labels = annotations::desired_labels(mt.labels());

    let mut outcome = SyncOutcome::default();
    for child in &children {
        annotations::update_child(&ctx.resolver, child, &desired_annotations, &desired_labels).await?;
        outcome.resources.push(relation(
            &child.api_version,
            &child.kind,
            &child.namespace(),
            &child.name(),
            SOURCE_ROLE,
        ));
    }

    let jobs = if enabled {
        build_jobs(mt, ctx, ns, wrapper_kind, &ports, &trait_defaults).await?
    } else {
        Vec::new()
    };
    scrape_config::update_scraper_config(client, &scraper, &trait_job_base(mt), &jobs).await?;
    outcome.resources.push(relation(
        "apps/v1",
        "Deployment",
        &scraper.namespace,
        &scraper.name,
        SCRAPER_ROLE,
    ));

    Ok(outcome)
}

async fn build_jobs(
    mt: &MetricsTrait,
    ctx: &Context,
    ns: &str,
    wrapper_kind: &str,
    ports: &[defaults::ResolvedPort],
    trait_defaults: &defaults::TraitDefaults,
) -> Result<Vec<scrape_config::ScrapeJob>> {
    let client = &ctx.client;
    let cluster_name = scrape_config::fetch_cluster_name(client).await?;
    let https = scrape_config::use_https_for_scrape_target(client, wrapper_kind, ns).await?;
    let basic_auth = match defaults::resolve_secret(&mt.spec, trait_defaults) {
        Some(secret) => Some(scrape_config::fetch_basic_auth(client, ns, &secret).await?),
        None => None,
    };
    let (app, component) = oam_names(mt);

    Ok((0..ports.len())
        .map(|port_index| {
            scrape_config::build_scrape_job(&JobParams {
                app: &app,
                component: &component,
                namespace: ns,
                cluster_name: &cluster_name,
                port_index,
                https,
                basic_auth: basic_auth.clone(),
            })
        })
        .collect())
}

/// Write the Synced condition and related resources
async fn update_status(
    mt: &MetricsTrait,
    ctx: &Context,
    ns: &str,
    outcome: std::result::Result<SyncOutcome, String>,
) -> Result<()> {
    let existing = mt.status.clone().unwrap_or_default();
    let (conditions, resources) = match outcome {
        Ok(sync) => (
            ConditionBuilder::from_existing(existing.conditions)
                .synced(None)
                .build(),
            sync.resources,
        ),
        // Keep the last known resources so delete can still clean them up
        Err(message) => (
            ConditionBuilder::from_existing(existing.conditions)
                .synced(Some(&message))
                .build(),
            existing.resources,
        ),
    };
    let status = MetricsTraitStatus {
        conditions,
        resources,
    };
    if mt.status.as_ref() == Some(&status) {
        return Ok(());
    }
    let api: Api<MetricsTrait> = Api::namespaced(ctx.client.clone(), ns);
    patch_status(&api, &mt.name_any(), &status).await
}

/// Remove everything the trait added, then release the finalizer
async fn reconcile_trait_delete(mt: &MetricsTrait, ctx: &Context, ns: &str) -> Result<Action> {
    if !has_finalizer(mt) {
        return Ok(Action::await_change());
    }
    info!("Handling deletion of {}", mt.name_any());
    let client = &ctx.client;

    for resource in mt.related_resources(SOURCE_ROLE) {
        annotations::remove_from_resource(&ctx.resolver, &resource).await?;
    }

    let mut scrapers: Vec<String> = mt
        .related_resources(SCRAPER_ROLE)
        .into_iter()
        .map(|r| format!("{}/{}", r.namespace, r.name))
        .collect();
    if scrapers.is_empty() {
        scrapers.push(scraper_ref(mt, ctx));
    }
    let base = trait_job_base(mt);
    for scraper_ref in scrapers {
        let removed = match scrape_config::fetch_scraper(client, &scraper_ref).await {
            Ok(scraper) => scrape_config::update_scraper_config(client, &scraper, &base, &[]).await,
            Err(e) => Err(e),
        };
        match removed {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                debug!(scraper = %scraper_ref, "Scraper already gone");
            }
            // Nothing to clean in a scraper that can never be read
            Err(e) if e.is_unusable_config() => {
                warn!(scraper = %scraper_ref, "Skipping scrape job cleanup: {}", e);
            }
            Err(e) => return Err(e),
        }
    }

    remove_finalizer(mt, ctx, ns).await?;
    Ok(Action::await_change())
}
