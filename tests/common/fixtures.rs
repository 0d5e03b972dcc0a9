//! Test fixtures and builders for MetricsTrait and Verrazzano resources
//!
//! # Quick Start
//!
//! ```rust,ignore
//! let mt = MetricsTraitBuilder::new("my-trait", "default")
//!     .for_workload("apps/v1", "Deployment", "hello")
//!     .with_oam_labels("hello-app", "hello-comp")
//!     .build();
//! ```

use std::collections::BTreeMap;

use kube::api::DynamicObject;
use kube::core::ObjectMeta;
use serde_json::json;
use verrazzano_operator::controller::metrics_trait::FINALIZER;
use verrazzano_operator::controller::metrics_trait::annotations::{
    OAM_APP_LABEL, OAM_COMPONENT_LABEL,
};
use verrazzano_operator::controller::metrics_trait::workload::Workload;
use verrazzano_operator::crd::{
    ComponentConfig, ComponentSpec, KeySelector, MetricsTrait, MetricsTraitSpec,
    MetricsTraitStatus, Overrides, PortSpec, QualifiedResourceRelation, TypedReference,
    Verrazzano, VerrazzanoSpec,
};

// =============================================================================
// MetricsTrait Builder
// =============================================================================

/// Builder for MetricsTrait test objects
pub struct MetricsTraitBuilder {
    metadata: ObjectMeta,
    spec: MetricsTraitSpec,
    status: Option<MetricsTraitStatus>,
}

impl MetricsTraitBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some(format!("{name}-uid")),
                generation: Some(1),
                ..Default::default()
            },
            spec: MetricsTraitSpec {
                workload_ref: TypedReference {
                    api_version: "apps/v1".to_string(),
                    kind: "Deployment".to_string(),
                    name: "hello".to_string(),
                    uid: None,
                },
                ..Default::default()
            },
            status: None,
        }
    }

    pub fn for_workload(mut self, api_version: &str, kind: &str, name: &str) -> Self {
        self.spec.workload_ref = TypedReference {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: None,
        };
        self
    }

    pub fn with_oam_labels(mut self, app: &str, component: &str) -> Self {
        let labels = self.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(OAM_APP_LABEL.to_string(), app.to_string());
        labels.insert(OAM_COMPONENT_LABEL.to_string(), component.to_string());
        self
    }

    pub fn with_port(mut self, port: i32, path: &str) -> Self {
        self.spec.port = Some(port);
        self.spec.path = Some(path.to_string());
        self
    }

    pub fn with_extra_port(mut self, port: Option<i32>, path: Option<&str>) -> Self {
        self.spec.ports.push(PortSpec {
            port,
            path: path.map(str::to_string),
        });
        self
    }

    pub fn with_scraper(mut self, scraper: &str) -> Self {
        self.spec.scraper = Some(scraper.to_string());
        self
    }

    pub fn with_secret(mut self, secret: &str) -> Self {
        self.spec.secret = Some(secret.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.spec.enabled = Some(false);
        self
    }

    pub fn with_finalizer(mut self) -> Self {
        self.metadata
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(FINALIZER.to_string());
        self
    }

    pub fn deleting(mut self) -> Self {
        self.metadata.deletion_timestamp =
            serde_json::from_value(json!("2026-01-01T00:00:00Z")).unwrap();
        self
    }

    pub fn with_related(mut self, relation: QualifiedResourceRelation) -> Self {
        self.status
            .get_or_insert_with(MetricsTraitStatus::default)
            .resources
            .push(relation);
        self
    }

    pub fn build(self) -> MetricsTrait {
        MetricsTrait {
            metadata: self.metadata,
            spec: self.spec,
            status: self.status,
        }
    }
}

// =============================================================================
// Verrazzano Builder
// =============================================================================

/// Builder for Verrazzano test objects
pub struct VerrazzanoBuilder {
    name: String,
    namespace: String,
    components: ComponentSpec,
}

impl VerrazzanoBuilder {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            components: ComponentSpec::default(),
        }
    }

    pub fn with_istio(mut self, config: ComponentConfig) -> Self {
        self.components.istio = Some(config);
        self
    }

    pub fn with_cert_manager(mut self, config: ComponentConfig) -> Self {
        self.components.cert_manager = Some(config);
        self
    }

    pub fn with_oam(mut self, config: ComponentConfig) -> Self {
        self.components.oam = Some(config);
        self
    }

    pub fn build(self) -> Verrazzano {
        let mut vz = Verrazzano::new(
            &self.name,
            VerrazzanoSpec {
                components: self.components,
                ..Default::default()
            },
        );
        vz.metadata.namespace = Some(self.namespace);
        vz.metadata.generation = Some(1);
        vz
    }
}

/// Component configuration watching a single ConfigMap override
pub fn config_map_overrides(name: &str, monitor: Option<bool>) -> ComponentConfig {
    ComponentConfig {
        monitor_changes: monitor,
        overrides: vec![Overrides {
            config_map_ref: Some(KeySelector {
                name: name.to_string(),
                key: Some("values.yaml".to_string()),
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Component configuration watching a single Secret override
pub fn secret_overrides(name: &str) -> ComponentConfig {
    ComponentConfig {
        overrides: vec![Overrides {
            secret_ref: Some(KeySelector {
                name: name.to_string(),
                key: None,
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}

// =============================================================================
// Workload Helpers
// =============================================================================

/// Untyped object with the given metadata and body
pub fn dynamic_object(name: &str, namespace: &str, data: serde_json::Value) -> DynamicObject {
    let mut obj = DynamicObject {
        types: None,
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("{name}-uid")),
            ..Default::default()
        },
        data,
    };
    if obj.data.is_null() {
        obj.data = json!({});
    }
    obj
}

/// A Deployment workload with an empty pod template
pub fn deployment_workload(name: &str, namespace: &str) -> Workload {
    Workload::new(
        "apps/v1",
        "Deployment",
        dynamic_object(
            name,
            namespace,
            json!({ "spec": { "template": { "metadata": {} } } }),
        ),
    )
}

/// A Prometheus configuration holding one static job per name
pub fn prometheus_config(job_names: &[&str]) -> String {
    let jobs: Vec<serde_json::Value> = job_names
        .iter()
        .map(|name| {
            json!({
                "job_name": name,
                "static_configs": [{ "targets": ["localhost:9090"] }]
            })
        })
        .collect();
    let config = json!({
        "global": { "scrape_interval": "20s" },
        "scrape_configs": jobs
    });
    serde_yaml::to_string(&config).unwrap()
}

/// Job names in a Prometheus configuration, in order
pub fn job_names(config_text: &str) -> Vec<String> {
    let config: serde_yaml::Value = serde_yaml::from_str(config_text).unwrap();
    config
        .get("scrape_configs")
        .and_then(serde_yaml::Value::as_sequence)
        .map(|jobs| {
            jobs.iter()
                .filter_map(|j| j.get("job_name").and_then(serde_yaml::Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
