use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use verrazzano_operator::OperatorConfig;
use verrazzano_operator::health::{HealthState, run_health_server};
use verrazzano_operator::{
    run_containerized_workload_controller, run_helm_overrides_controllers,
    run_metrics_trait_controller, run_verrazzano_controller,
};

const LEASE_NAME: &str = "verrazzano-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

/// Time given to in-flight reconciles after a shutdown signal
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    install_crypto_provider()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("verrazzano_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting verrazzano-operator");

    let client = Client::try_default().await?;
    let config = Arc::new(OperatorConfig::from_env());
    let health_state = Arc::new(HealthState::new());

    // Probes answer while this replica is still waiting for the lease
    let health_handle = {
        let health_state = health_state.clone();
        let addr = config.health_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, &addr).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease = LeaseLock::new(
        client.clone(),
        &config.pod_namespace,
        LeaseLockParams {
            holder_id: config.pod_name.clone(),
            lease_name: LEASE_NAME.to_string(),
            lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
        },
    );
    info!(
        holder_id = %config.pod_name,
        namespace = %config.pod_namespace,
        lease_name = LEASE_NAME,
        "Waiting to acquire leadership"
    );
    acquire_leadership(&lease).await;
    let lease_renewal_handle = spawn_lease_renewal(lease);

    info!(
        default_scraper = %config.default_scraper,
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("all"),
        "Starting controllers"
    );
    let state = Some(health_state.clone());
    let metrics_trait_handle = tokio::spawn(run_metrics_trait_controller(
        client.clone(),
        config.clone(),
        state.clone(),
    ));
    let containerized_workload_handle = tokio::spawn(run_containerized_workload_controller(
        client.clone(),
        config.clone(),
        state.clone(),
    ));
    let helm_overrides_handle = tokio::spawn(run_helm_overrides_controllers(
        client.clone(),
        config.clone(),
        state.clone(),
    ));
    let verrazzano_handle = tokio::spawn(run_verrazzano_controller(client, config, state));

    health_state.set_ready(true).await;

    tokio::select! {
        result = metrics_trait_handle => log_task_exit("MetricsTrait controller", result),
        result = containerized_workload_handle => log_task_exit("ContainerizedWorkload controller", result),
        result = helm_overrides_handle => log_task_exit("Helm override controllers", result),
        result = verrazzano_handle => log_task_exit("Verrazzano controller", result),
        result = health_handle => log_task_exit("Health server", result),
        // Renewal only returns by panicking; losing the lease exits the process
        Err(e) = lease_renewal_handle => {
            error!("Lease renewal task panicked: {}", e);
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            health_state.set_ready(false).await;
            info!(
                "Waiting {}s for in-flight reconciliations to complete",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

/// Install the process-wide rustls provider.
///
/// Installation fails when a provider is already present, which is fine.
fn install_crypto_provider() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider".into());
    }
    Ok(())
}

/// Block until this replica holds the lease
async fn acquire_leadership(lease: &LeaseLock) {
    loop {
        match lease.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Another instance is leader, waiting"),
            Err(e) => warn!("Failed to acquire lease: {}, retrying", e),
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }
}

/// Keep renewing the lease. Losing it exits so the pod re-enters election on restart.
fn spawn_lease_renewal(lease: LeaseLock) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
            match lease.try_acquire_or_renew().await {
                Ok(result) if result.acquired_lease => {}
                Ok(_) => {
                    error!("Lost leadership, shutting down");
                    std::process::exit(1);
                }
                Err(e) => {
                    error!("Failed to renew lease: {}, shutting down", e);
                    std::process::exit(1);
                }
            }
        }
    })
}

fn log_task_exit(task: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => error!("{} exited", task),
        Err(e) => error!("{} task panicked: {}", task, e),
    }
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
