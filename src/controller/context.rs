use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::metrics_trait::workload::ResourceResolver;
use crate::health::HealthState;

/// Shared context for the controllers
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Operator settings
    pub config: Arc<OperatorConfig>,
    /// Discovered API resources for untyped workloads
    pub resolver: ResourceResolver,
    /// Health state for recording reconcile metrics
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    pub fn new(
        client: Client,
        config: Arc<OperatorConfig>,
        health_state: Option<Arc<HealthState>>,
    ) -> Self {
        Self {
            resolver: ResourceResolver::new(client.clone()),
            client,
            config,
            health_state,
        }
    }

    /// Record the outcome of one reconcile in the metrics registry
    pub fn record_reconcile(&self, controller: &str, namespace: &str, duration_secs: f64, ok: bool) {
        if let Some(state) = &self.health_state {
            state
                .metrics
                .record_reconcile(controller, namespace, duration_secs);
            if !ok {
                state.metrics.record_error(controller, namespace);
            }
        }
    }
}
