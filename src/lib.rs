pub mod component;
pub mod config;
pub mod controller;
pub mod crd;
pub mod health;

pub use config::OperatorConfig;
pub use controller::{Context, Error, Result};
pub use crd::{ContainerizedWorkload, MetricsTrait, Verrazzano, WorkloadDefinition};
pub use health::{HealthState, Metrics};

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use controller::{containerized_workload, helm_overrides, metrics_trait, verrazzano};

/// Helper to create a namespaced or cluster-wide API based on scope.
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Log the outcome of each reconcile from a controller stream.
///
/// Not-found errors are expected after deletion, when a queued event
/// arrives for an object that no longer exists.
async fn log_result<K>(
    name: &'static str,
    result: std::result::Result<(ObjectRef<K>, Action), kube::runtime::controller::Error<Error, kube::runtime::watcher::Error>>,
) where
    K: Resource,
    K::DynamicType: Debug + Eq + std::hash::Hash + Clone,
{
    match result {
        Ok((obj, _action)) => {
            tracing::debug!(controller = name, "Reconciled: {}", obj.name);
        }
        Err(e) => {
            let is_not_found = matches!(
                &e,
                kube::runtime::controller::Error::ReconcilerFailed(err, _) if err.is_not_found()
            );
            if is_not_found {
                tracing::debug!(controller = name, "Object no longer exists (likely deleted): {:?}", e);
            } else {
                tracing::error!(controller = name, "Reconciliation error: {:?}", e);
            }
        }
    }
}

fn new_context(client: &Client, config: &Arc<OperatorConfig>, health_state: &Option<Arc<HealthState>>) -> Arc<Context> {
    Arc::new(Context::new(client.clone(), config.clone(), health_state.clone()))
}

/// Run the MetricsTrait controller.
///
/// When `config.watch_namespace` is set only that namespace is watched.
pub async fn run_metrics_trait_controller(
    client: Client,
    config: Arc<OperatorConfig>,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    tracing::info!("Starting controller for MetricsTrait resources (scope: {})", scope_msg);

    let ctx = new_context(&client, &config, &health_state);
    let traits: Api<MetricsTrait> = scoped_api(client.clone(), namespace.as_deref());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(traits, watcher_config)
        .run(metrics_trait::reconcile, metrics_trait::error_policy, ctx)
        .for_each(|result| log_result(metrics_trait::CONTROLLER_NAME, result))
        .await;

    tracing::error!("MetricsTrait controller stream ended unexpectedly");
}

/// Run the ContainerizedWorkload restart controller.
///
/// Deployments created by a workload are watched too, so a Deployment
/// replaced by the OAM runtime picks up the current restart version.
pub async fn run_containerized_workload_controller(
    client: Client,
    config: Arc<OperatorConfig>,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    let scope_msg = namespace.as_deref().unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for ContainerizedWorkload resources (scope: {})",
        scope_msg
    );

    let ctx = new_context(&client, &config, &health_state);
    let workloads: Api<ContainerizedWorkload> = scoped_api(client.clone(), namespace.as_deref());
    let deployments: Api<Deployment> = scoped_api(client.clone(), namespace.as_deref());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(workloads, watcher_config.clone())
        .owns(deployments, watcher_config)
        .run(
            containerized_workload::reconcile,
            containerized_workload::error_policy,
            ctx,
        )
        .for_each(|result| log_result(containerized_workload::CONTROLLER_NAME, result))
        .await;

    tracing::error!("ContainerizedWorkload controller stream ended unexpectedly");
}

/// Run the ConfigMap and Secret controllers that watch Helm override sources
pub async fn run_helm_overrides_controllers(
    client: Client,
    config: Arc<OperatorConfig>,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    tracing::info!(
        "Starting controllers for Helm override sources (scope: {})",
        namespace.as_deref().unwrap_or("cluster-wide")
    );

    let ctx = new_context(&client, &config, &health_state);
    let config_maps: Api<ConfigMap> = scoped_api(client.clone(), namespace.as_deref());
    let secrets: Api<Secret> = scoped_api(client.clone(), namespace.as_deref());
    let watcher_config = WatcherConfig::default().any_semantic();

    let config_map_controller = Controller::new(config_maps, watcher_config.clone())
        .run(
            helm_overrides::reconcile_config_map,
            helm_overrides::error_policy,
            ctx.clone(),
        )
        .for_each(|result| log_result(helm_overrides::CONTROLLER_NAME, result));
    let secret_controller = Controller::new(secrets, watcher_config)
        .run(helm_overrides::reconcile_secret, helm_overrides::error_policy, ctx)
        .for_each(|result| log_result(helm_overrides::CONTROLLER_NAME, result));

    futures::join!(config_map_controller, secret_controller);

    tracing::error!("Helm override controller streams ended unexpectedly");
}

/// Run the Verrazzano platform controller
pub async fn run_verrazzano_controller(
    client: Client,
    config: Arc<OperatorConfig>,
    health_state: Option<Arc<HealthState>>,
) {
    let namespace = config.watch_namespace.clone();
    tracing::info!(
        "Starting controller for Verrazzano resources (scope: {})",
        namespace.as_deref().unwrap_or("cluster-wide")
    );

    let ctx = new_context(&client, &config, &health_state);
    let vzs: Api<Verrazzano> = scoped_api(client.clone(), namespace.as_deref());
    let watcher_config = WatcherConfig::default().any_semantic();

    Controller::new(vzs, watcher_config)
        .run(verrazzano::reconcile, verrazzano::error_policy, ctx)
        .for_each(|result| log_result(verrazzano::CONTROLLER_NAME, result))
        .await;

    tracing::error!("Verrazzano controller stream ended unexpectedly");
}
