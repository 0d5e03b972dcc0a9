use std::collections::BTreeMap;

use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use kube::api::{ObjectMeta, Patch, PatchParams};
use kube::{Api, Client};
use tracing::info;

use crate::controller::error::Result;
use crate::controller::status::FIELD_MANAGER;

pub const PVC_CLUSTER_ROLE_NAME: &str = "oam-kubernetes-runtime-pvc";
pub const AGGREGATE_TO_CONTROLLER_LABEL: &str = "rbac.oam.dev/aggregate-to-controller";

/// ClusterRole letting the OAM runtime manage PersistentVolumeClaim workloads.
///
/// The aggregation label folds it into the runtime's own ClusterRole.
pub fn pvc_cluster_role() -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(PVC_CLUSTER_ROLE_NAME.to_string()),
            labels: Some(BTreeMap::from([(
                AGGREGATE_TO_CONTROLLER_LABEL.to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        },
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["persistentvolumeclaims".to_string()]),
            verbs: ["create", "delete", "get", "list", "patch", "update", "deletecollection"]
                .into_iter()
                .map(String::from)
                .collect(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Create or update the extra OAM cluster roles
pub async fn ensure_oam_cluster_roles(client: &Client) -> Result<()> {
    let api: Api<ClusterRole> = Api::all(client.clone());
    api.patch(
        PVC_CLUSTER_ROLE_NAME,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&pvc_cluster_role()),
    )
    .await?;
    info!(clusterrole = PVC_CLUSTER_ROLE_NAME, "Ensured OAM cluster role");
    Ok(())
}
