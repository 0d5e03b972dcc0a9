//! Prometheus scrape configuration owned by MetricsTraits
//!
//! The scraper's `prometheus.yml` is edited as a `serde_yaml::Value` so
//! that keys the operator does not own survive a round trip. Jobs written
//! by the operator are built from typed structs.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret};
use kube::api::PostParams;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use super::workload::VERRAZZANO_COHERENCE_WORKLOAD;
use crate::config::parse_scraper;
use crate::controller::error::{Error, Result};

pub const PROMETHEUS_CONFIG_KEY: &str = "prometheus.yml";
pub const PROMETHEUS_CONFIG_VOLUME: &str = "config-volume";
pub const SCRAPE_CONFIGS_KEY: &str = "scrape_configs";

pub const CLUSTER_NAME_LABEL: &str = "verrazzano_cluster";
pub const VERRAZZANO_SYSTEM_NAMESPACE: &str = "verrazzano-system";
pub const MC_REGISTRATION_SECRET: &str = "verrazzano-cluster-registration";
pub const MC_LOCAL_REGISTRATION_SECRET: &str = "verrazzano-local-registration";
pub const CLUSTER_NAME_DATA_KEY: &str = "managed-cluster-name";
pub const LOCAL_CLUSTER_NAME: &str = "local";

/// Cluster segment of job names; object metadata carries no cluster name
pub const JOB_CLUSTER_SEGMENT: &str = "default";

const ISTIO_CA_FILE: &str = "/etc/istio-certs/root-cert.pem";
const ISTIO_CERT_FILE: &str = "/etc/istio-certs/cert-chain.pem";
const ISTIO_KEY_FILE: &str = "/etc/istio-certs/key.pem";

const ANNOTATION_META: &str = "__meta_kubernetes_pod_annotation_verrazzano_io_";

/// A single Prometheus scrape job
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScrapeJob {
    pub job_name: String,
    pub kubernetes_sd_configs: Vec<KubernetesSdConfig>,
    pub relabel_configs: Vec<RelabelConfig>,
    pub scheme: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KubernetesSdConfig {
    pub role: String,
    pub namespaces: NamespaceNames,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NamespaceNames {
    pub names: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct RelabelConfig {
    pub action: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TlsConfig {
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Client certificates mounted from the Istio sidecar
    pub fn istio() -> Self {
        Self {
            ca_file: ISTIO_CA_FILE.to_string(),
            cert_file: ISTIO_CERT_FILE.to_string(),
            key_file: ISTIO_KEY_FILE.to_string(),
            insecure_skip_verify: true,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Inputs for one scrape job
#[derive(Clone, Debug)]
pub struct JobParams<'a> {
    pub app: &'a str,
    pub component: &'a str,
    pub namespace: &'a str,
    pub cluster_name: &'a str,
    pub port_index: usize,
    pub https: bool,
    pub basic_auth: Option<BasicAuth>,
}

/// Name shared by every job of a trait: `<app>_default_<namespace>_<component>`
pub fn job_base_name(app: &str, namespace: &str, component: &str) -> String {
    format!("{app}_{JOB_CLUSTER_SEGMENT}_{namespace}_{component}")
}

/// Job name for the port at `index`
pub fn job_name(base: &str, index: usize) -> String {
    if index == 0 {
        base.to_string()
    } else {
        format!("{base}_{index}")
    }
}

/// True when `name` is the base job or one of its indexed siblings
pub fn is_trait_job(name: &str, base: &str) -> bool {
    match name.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('_')
            .is_some_and(|i| !i.is_empty() && i.bytes().all(|b| b.is_ascii_digit())),
        None => false,
    }
}

fn suffix(index: usize) -> String {
    if index == 0 {
        String::new()
    } else {
        index.to_string()
    }
}

fn replace(source: &[&str], target: &str, regex: Option<&str>, replacement: Option<&str>) -> RelabelConfig {
    RelabelConfig {
        action: "replace".to_string(),
        source_labels: source.iter().map(|s| s.to_string()).collect(),
        target_label: Some(target.to_string()),
        regex: regex.map(str::to_string),
        replacement: replacement.map(str::to_string),
    }
}

/// Build the scrape job for one port of a trait
pub fn build_scrape_job(params: &JobParams<'_>) -> ScrapeJob {
    let idx = suffix(params.port_index);
    let enabled = format!("{ANNOTATION_META}metricsEnabled{idx}");
    let path = format!("{ANNOTATION_META}metricsPath{idx}");
    let port = format!("{ANNOTATION_META}metricsPort{idx}");

    let relabel_configs = vec![
        replace(&[], CLUSTER_NAME_LABEL, None, Some(params.cluster_name)),
        RelabelConfig {
            action: "keep".to_string(),
            source_labels: vec![
                enabled,
                "__meta_kubernetes_pod_label_app_oam_dev_name".to_string(),
                "__meta_kubernetes_pod_label_app_oam_dev_component".to_string(),
            ],
            regex: Some(format!("true;{};{}", params.app, params.component)),
            ..Default::default()
        },
        replace(&[path.as_str()], "__metrics_path__", Some("(.+)"), None),
        replace(
            &["__address__", port.as_str()],
            "__address__",
            Some(r"([^:]+)(?::\d+)?;(\d+)"),
            Some("$1:$2"),
        ),
        replace(
            &["__meta_kubernetes_namespace"],
            "namespace",
            Some("(.*)"),
            Some("$1"),
        ),
        RelabelConfig {
            action: "labelmap".to_string(),
            regex: Some("__meta_kubernetes_pod_label_(.+)".to_string()),
            ..Default::default()
        },
        replace(&["__meta_kubernetes_pod_name"], "pod_name", None, None),
        RelabelConfig {
            action: "labeldrop".to_string(),
            regex: Some("(controller_revision_hash)".to_string()),
            ..Default::default()
        },
        replace(&["name"], "webapp", Some(".*/(.*)$"), Some("$1")),
    ];

    ScrapeJob {
        job_name: job_name(
            &job_base_name(params.app, params.namespace, params.component),
            params.port_index,
        ),
        kubernetes_sd_configs: vec![KubernetesSdConfig {
            role: "pod".to_string(),
            namespaces: NamespaceNames {
                names: vec![params.namespace.to_string()],
            },
        }],
        relabel_configs,
        scheme: if params.https { "https" } else { "http" }.to_string(),
        tls_config: params.https.then(TlsConfig::istio),
        basic_auth: params.basic_auth.clone(),
    }
}

fn trait_job_positions(config: &Value, base: &str) -> Vec<usize> {
    config
        .get(SCRAPE_CONFIGS_KEY)
        .and_then(Value::as_sequence)
        .map(|jobs| {
            jobs.iter()
                .enumerate()
                .filter(|(_, job)| {
                    job.get("job_name")
                        .and_then(Value::as_str)
                        .is_some_and(|name| is_trait_job(name, base))
                })
                .map(|(i, _)| i)
                .collect()
        })
        .unwrap_or_default()
}

/// Remove every job belonging to `base`, returning how many were removed
pub fn remove_trait_jobs(config: &mut Value, base: &str) -> usize {
    let Some(jobs) = config
        .get_mut(SCRAPE_CONFIGS_KEY)
        .and_then(Value::as_sequence_mut)
    else {
        return 0;
    };
    let before = jobs.len();
    jobs.retain(|job| {
        !job.get("job_name")
            .and_then(Value::as_str)
            .is_some_and(|name| is_trait_job(name, base))
    });
    before - jobs.len()
}

fn not_a_mapping() -> Error {
    Error::InvalidConfig(format!("{PROMETHEUS_CONFIG_KEY} is not a mapping"))
}

/// Replace the jobs of `base` in a `prometheus.yml` document.
///
/// New jobs take the place of the first old one so that traits sharing a
/// scraper do not reorder each other's jobs. Returns the new document
/// text, or `None` when the configuration is already up to date. An empty
/// `jobs` slice only removes.
pub fn apply_trait_jobs(config_text: &str, base: &str, jobs: &[ScrapeJob]) -> Result<Option<String>> {
    let original: Value = match serde_yaml::from_str(config_text)? {
        Value::Null => Value::Mapping(Mapping::new()),
        v @ Value::Mapping(_) => v,
        _ => return Err(not_a_mapping()),
    };

    let mut config = original.clone();
    let insert_at = trait_job_positions(&config, base).first().copied();
    remove_trait_jobs(&mut config, base);

    if !jobs.is_empty() {
        let Value::Mapping(root) = &mut config else {
            return Err(not_a_mapping());
        };
        if root.get(SCRAPE_CONFIGS_KEY).is_none_or(Value::is_null) {
            root.insert(
                Value::String(SCRAPE_CONFIGS_KEY.to_string()),
                Value::Sequence(Vec::new()),
            );
        }
        let Some(Value::Sequence(existing)) = root.get_mut(SCRAPE_CONFIGS_KEY) else {
            return Err(Error::InvalidConfig(format!(
                "{SCRAPE_CONFIGS_KEY} is not a list"
            )));
        };
        let at = insert_at.unwrap_or(existing.len()).min(existing.len());
        let new_jobs = jobs
            .iter()
            .map(serde_yaml::to_value)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        existing.splice(at..at, new_jobs);
    }

    if config == original {
        return Ok(None);
    }
    Ok(Some(serde_yaml::to_string(&config)?))
}

/// Whether scrape traffic to a workload must go through Istio mTLS.
///
/// Coherence pods are always scraped over plain HTTP.
pub fn https_for_scrape_target(workload_kind: &str, namespace: &Namespace) -> bool {
    if workload_kind == VERRAZZANO_COHERENCE_WORKLOAD || workload_kind == "Coherence" {
        return false;
    }
    namespace
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get("istio-injection"))
        .is_some_and(|v| v == "enabled")
}

/// Look up the workload namespace and decide the scrape scheme
pub async fn use_https_for_scrape_target(client: &Client, workload_kind: &str, namespace: &str) -> Result<bool> {
    if workload_kind == VERRAZZANO_COHERENCE_WORKLOAD || workload_kind == "Coherence" {
        return Ok(false);
    }
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = api.get(namespace).await?;
    Ok(https_for_scrape_target(workload_kind, &ns))
}

fn secret_value(secret: &Secret, key: &str) -> Option<String> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .and_then(|b| String::from_utf8(b.0.clone()).ok())
        .or_else(|| secret.string_data.as_ref().and_then(|d| d.get(key).cloned()))
}

/// Name of this cluster as registered with Verrazzano, `local` when unregistered
pub async fn fetch_cluster_name(client: &Client) -> Result<String> {
    let api: Api<Secret> = Api::namespaced(client.clone(), VERRAZZANO_SYSTEM_NAMESPACE);
    for name in [MC_REGISTRATION_SECRET, MC_LOCAL_REGISTRATION_SECRET] {
        if let Some(secret) = api.get_opt(name).await? {
            if let Some(cluster) = secret_value(&secret, CLUSTER_NAME_DATA_KEY).filter(|c| !c.is_empty()) {
                return Ok(cluster);
            }
        }
    }
    Ok(LOCAL_CLUSTER_NAME.to_string())
}

/// Read basic auth credentials from a secret in the trait namespace
pub async fn fetch_basic_auth(client: &Client, namespace: &str, secret_name: &str) -> Result<BasicAuth> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = api
        .get_opt(secret_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("secret {namespace}/{secret_name}")))?;
    Ok(BasicAuth {
        username: secret_value(&secret, "username").ok_or(Error::MissingObjectKey("username"))?,
        password: secret_value(&secret, "password").ok_or(Error::MissingObjectKey("password"))?,
    })
}

/// A Prometheus deployment and the ConfigMap holding its configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scraper {
    pub namespace: String,
    pub name: String,
    pub config_map: String,
}

/// Name of the ConfigMap mounted through the `config-volume` volume
pub fn prometheus_config_map_name(deployment: &Deployment) -> Option<String> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find(|v| v.name == PROMETHEUS_CONFIG_VOLUME)?
        .config_map
        .as_ref()
        .map(|cm| cm.name.clone())
        .filter(|n| !n.is_empty())
}

/// Resolve a `namespace/name` scraper reference to its deployment and ConfigMap
pub async fn fetch_scraper(client: &Client, scraper: &str) -> Result<Scraper> {
    let (namespace, name) = parse_scraper(scraper)
        .ok_or_else(|| Error::InvalidConfig(format!("scraper {scraper} is not namespace/name")))?;
    let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let deployment = api
        .get_opt(name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("scraper deployment {scraper}")))?;
    let config_map = prometheus_config_map_name(&deployment).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "scraper {scraper} has no {PROMETHEUS_CONFIG_VOLUME} volume"
        ))
    })?;
    Ok(Scraper {
        namespace: namespace.to_string(),
        name: name.to_string(),
        config_map,
    })
}

/// Write the trait's jobs into the scraper configuration.
///
/// The ConfigMap is replaced with the resource version it was read at, so
/// a concurrent writer makes this fail with a conflict and the reconcile
/// is retried. Returns whether the ConfigMap was written.
pub async fn update_scraper_config(client: &Client, scraper: &Scraper, base: &str, jobs: &[ScrapeJob]) -> Result<bool> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), &scraper.namespace);
    let Some(mut config_map) = api.get_opt(&scraper.config_map).await? else {
        return Err(Error::NotFound(format!(
            "prometheus configmap {}/{}",
            scraper.namespace, scraper.config_map
        )));
    };

    let current = config_map
        .data
        .as_ref()
        .and_then(|d| d.get(PROMETHEUS_CONFIG_KEY))
        .cloned()
        .unwrap_or_default();

    let Some(updated) = apply_trait_jobs(&current, base, jobs)? else {
        debug!(configmap = %scraper.config_map, job = %base, "Scrape configuration up to date");
        return Ok(false);
    };

    config_map
        .data
        .get_or_insert_with(Default::default)
        .insert(PROMETHEUS_CONFIG_KEY.to_string(), updated);
    api.replace(&scraper.config_map, &PostParams::default(), &config_map)
        .await?;
    info!(configmap = %scraper.config_map, job = %base, jobs = jobs.len(), "Updated scrape configuration");
    Ok(true)
}
