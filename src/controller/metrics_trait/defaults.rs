//! Metrics defaults per workload type and port resolution

use serde_json::Value;

use super::workload::{Workload, WorkloadType};
use crate::crd::MetricsTraitSpec;

pub const WEBLOGIC_METRICS_PORT: i32 = 7001;
pub const WEBLOGIC_METRICS_PATH: &str = "/wls-exporter/metrics";
pub const COHERENCE_METRICS_PORT: i32 = 9612;
pub const GENERIC_METRICS_PORT: i32 = 8080;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";

/// Port, path and credentials used when the trait leaves them unset
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraitDefaults {
    pub port: i32,
    pub path: String,
    pub secret: Option<String>,
}

/// One effective scrape endpoint
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedPort {
    pub port: i32,
    pub path: String,
}

/// Compute the defaults for a classified workload
pub fn trait_defaults(workload_type: WorkloadType, workload: &Workload) -> TraitDefaults {
    match workload_type {
        WorkloadType::WebLogic => TraitDefaults {
            port: WEBLOGIC_METRICS_PORT,
            path: WEBLOGIC_METRICS_PATH.to_string(),
            secret: workload
                .field(&["spec", "webLogicCredentialsSecret", "name"])
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        },
        WorkloadType::Coherence => TraitDefaults {
            port: workload
                .field(&["spec", "coherence", "metrics", "port"])
                .and_then(Value::as_i64)
                .and_then(|p| i32::try_from(p).ok())
                .unwrap_or(COHERENCE_METRICS_PORT),
            path: DEFAULT_METRICS_PATH.to_string(),
            secret: None,
        },
        WorkloadType::Generic => TraitDefaults {
            port: GENERIC_METRICS_PORT,
            path: DEFAULT_METRICS_PATH.to_string(),
            secret: None,
        },
    }
}

/// Resolve the ordered list of scrape endpoints.
///
/// `spec.port` comes first when set, followed by every `spec.ports` entry.
/// Missing fields take the defaults and an empty result falls back to the
/// single default endpoint.
pub fn resolve_ports(spec: &MetricsTraitSpec, defaults: &TraitDefaults) -> Vec<ResolvedPort> {
    let mut ports = Vec::with_capacity(spec.ports.len() + 1);
    if let Some(port) = spec.port {
        ports.push(ResolvedPort {
            port,
            path: spec.path.clone().unwrap_or_else(|| defaults.path.clone()),
        });
    }
    ports.extend(spec.ports.iter().map(|p| ResolvedPort {
        port: p.port.unwrap_or(defaults.port),
        path: p.path.clone().unwrap_or_else(|| defaults.path.clone()),
    }));
    if ports.is_empty() {
        ports.push(ResolvedPort {
            port: defaults.port,
            path: spec.path.clone().unwrap_or_else(|| defaults.path.clone()),
        });
    }
    ports
}

/// Secret holding basic auth credentials, trait value first
pub fn resolve_secret(spec: &MetricsTraitSpec, defaults: &TraitDefaults) -> Option<String> {
    spec.secret
        .clone()
        .filter(|s| !s.is_empty())
        .or_else(|| defaults.secret.clone())
}
