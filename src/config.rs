//! Operator configuration read from the environment

use std::env;

use tracing::warn;

/// Prometheus deployment used when a MetricsTrait names no scraper
pub const DEFAULT_SCRAPER: &str = "verrazzano-system/vmi-system-prometheus-0";

/// Address the health and metrics server binds to
pub const DEFAULT_HEALTH_ADDR: &str = "0.0.0.0:8080";

/// Runtime settings for the operator process
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Identity used for leader election
    pub pod_name: String,
    /// Namespace holding the leader election lease
    pub pod_namespace: String,
    /// Restrict watches to one namespace; `None` watches cluster-wide
    pub watch_namespace: Option<String>,
    /// Default scraper in `namespace/name` form
    pub default_scraper: String,
    /// Health server bind address
    pub health_addr: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            pod_name: "unknown".to_string(),
            pod_namespace: "default".to_string(),
            watch_namespace: None,
            default_scraper: DEFAULT_SCRAPER.to_string(),
            health_addr: DEFAULT_HEALTH_ADDR.to_string(),
        }
    }
}

impl OperatorConfig {
    /// Build the configuration from process environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let pod_name = lookup("POD_NAME")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| {
                warn!("POD_NAME not set, using hostname");
                hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or(defaults.pod_name)
            });

        let pod_namespace = lookup("POD_NAMESPACE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| {
                warn!("POD_NAMESPACE not set, using 'default'");
                defaults.pod_namespace
            });

        let default_scraper = lookup("DEFAULT_SCRAPER")
            .filter(|v| parse_scraper(v).is_some())
            .unwrap_or(defaults.default_scraper);

        Self {
            pod_name,
            pod_namespace,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|v| !v.is_empty()),
            default_scraper,
            health_addr: lookup("HEALTH_ADDR")
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.health_addr),
        }
    }
}

/// Split a `namespace/name` scraper reference
pub fn parse_scraper(scraper: &str) -> Option<(&str, &str)> {
    let (ns, name) = scraper.split_once('/')?;
    if ns.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((ns, name))
}
