//! Platform components installed by a Verrazzano resource
//!
//! Each component knows where it runs, which Deployments signal that it is
//! ready, and how to read its configuration from the Verrazzano spec.

mod oam;

pub use oam::{AGGREGATE_TO_CONTROLLER_LABEL, PVC_CLUSTER_ROLE_NAME, ensure_oam_cluster_roles, pvc_cluster_role};

use k8s_openapi::api::apps::v1::Deployment;
use kube::{Api, Client};
use tracing::debug;

use crate::controller::error::Result;
use crate::crd::{ComponentConfig, Overrides, Verrazzano};

pub const VERRAZZANO_SYSTEM_NAMESPACE: &str = "verrazzano-system";

/// An installable platform component
pub trait Component: Send + Sync {
    fn name(&self) -> &'static str;

    fn namespace(&self) -> &'static str;

    /// This component's entry in the Verrazzano spec
    fn config<'a>(&self, vz: &'a Verrazzano) -> Option<&'a ComponentConfig>;

    /// Enabled state when `enabled` is unset
    fn enabled_by_default(&self) -> bool {
        true
    }

    /// Deployments, in [`Component::namespace`], that must be available
    fn ready_deployments(&self) -> &'static [&'static str];

    fn is_enabled(&self, vz: &Verrazzano) -> bool {
        self.config(vz)
            .and_then(|c| c.enabled)
            .unwrap_or(self.enabled_by_default())
    }

    /// Whether changes to override sources should trigger a reinstall.
    ///
    /// Components absent from `spec.components` are not monitored; present ones are
    /// unless `monitorChanges` is false.
    fn monitor_overrides(&self, vz: &Verrazzano) -> bool {
        self.config(vz)
            .map(|c| c.monitor_changes.unwrap_or(true))
            .unwrap_or(false)
    }

    fn overrides<'a>(&self, vz: &'a Verrazzano) -> &'a [Overrides] {
        self.config(vz).map(|c| c.overrides.as_slice()).unwrap_or(&[])
    }
}

struct CertManager;

impl Component for CertManager {
    fn name(&self) -> &'static str {
        "cert-manager"
    }

    fn namespace(&self) -> &'static str {
        "cert-manager"
    }

    fn config<'a>(&self, vz: &'a Verrazzano) -> Option<&'a ComponentConfig> {
        vz.spec.components.cert_manager.as_ref()
    }

    fn enabled_by_default(&self) -> bool {
        false
    }

    fn ready_deployments(&self) -> &'static [&'static str] {
        &["cert-manager", "cert-manager-cainjector", "cert-manager-webhook"]
    }
}

struct Istio;

impl Component for Istio {
    fn name(&self) -> &'static str {
        "istio"
    }

    fn namespace(&self) -> &'static str {
        "istio-system"
    }

    fn config<'a>(&self, vz: &'a Verrazzano) -> Option<&'a ComponentConfig> {
        vz.spec.components.istio.as_ref()
    }

    fn ready_deployments(&self) -> &'static [&'static str] {
        &["istiod"]
    }
}

struct Oam;

impl Component for Oam {
    fn name(&self) -> &'static str {
        "oam-kubernetes-runtime"
    }

    fn namespace(&self) -> &'static str {
        VERRAZZANO_SYSTEM_NAMESPACE
    }

    fn config<'a>(&self, vz: &'a Verrazzano) -> Option<&'a ComponentConfig> {
        vz.spec.components.oam.as_ref()
    }

    fn ready_deployments(&self) -> &'static [&'static str] {
        &["oam-kubernetes-runtime"]
    }
}

struct CoherenceOperator;

impl Component for CoherenceOperator {
    fn name(&self) -> &'static str {
        "coherence-operator"
    }

    fn namespace(&self) -> &'static str {
        VERRAZZANO_SYSTEM_NAMESPACE
    }

    fn config<'a>(&self, vz: &'a Verrazzano) -> Option<&'a ComponentConfig> {
        vz.spec.components.coherence_operator.as_ref()
    }

    fn ready_deployments(&self) -> &'static [&'static str] {
        &["coherence-operator"]
    }
}

static REGISTRY: [&dyn Component; 4] = [&CertManager, &Istio, &Oam, &CoherenceOperator];

/// Every known component, in install order
pub fn registry() -> &'static [&'static dyn Component] {
    &REGISTRY
}

/// Look up a component by name
pub fn find(name: &str) -> Option<&'static dyn Component> {
    registry().iter().copied().find(|c| c.name() == name)
}

/// True when every named Deployment exists with at least `min_replicas` available
pub async fn deployments_ready(client: &Client, namespace: &str, names: &[&str], min_replicas: i32) -> Result<bool> {
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    for name in names {
        let Some(deployment) = api.get_opt(name).await? else {
            debug!(%namespace, deployment = %name, "Deployment not found");
            return Ok(false);
        };
        let available = deployment
            .status
            .as_ref()
            .and_then(|s| s.available_replicas)
            .unwrap_or(0);
        if available < min_replicas {
            debug!(%namespace, deployment = %name, available, "Deployment not ready");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Readiness of a component's Deployments
pub async fn is_ready(client: &Client, component: &dyn Component) -> Result<bool> {
    deployments_ready(client, component.namespace(), component.ready_deployments(), 1).await
}
