//! Unit tests for Prometheus scrape configuration editing

use verrazzano_operator::controller::metrics_trait::scrape_config::{
    BasicAuth, JobParams, ScrapeJob, apply_trait_jobs, build_scrape_job, is_trait_job,
    job_base_name,
};

use crate::common::*;

fn jobs_for(app: &str, component: &str, count: usize) -> Vec<ScrapeJob> {
    (0..count)
        .map(|port_index| {
            build_scrape_job(&JobParams {
                app,
                component,
                namespace: "todo",
                cluster_name: "local",
                port_index,
                https: false,
                basic_auth: None,
            })
        })
        .collect()
}

// =============================================================================
// Job naming
// =============================================================================

#[test]
fn test_job_names_per_port() {
    let jobs = jobs_for("todo-app", "todo-domain", 3);
    let names: Vec<&str> = jobs.iter().map(|j| j.job_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "todo-app_default_todo_todo-domain",
            "todo-app_default_todo_todo-domain_1",
            "todo-app_default_todo_todo-domain_2",
        ]
    );
}

#[test]
fn test_other_component_is_not_a_trait_job() {
    let base = job_base_name("todo-app", "todo", "todo");
    assert!(is_trait_job("todo-app_default_todo_todo", &base));
    assert!(is_trait_job("todo-app_default_todo_todo_4", &base));
    assert!(!is_trait_job("todo-app_default_todo_todo-mysql", &base));
    assert!(!is_trait_job("todo-app_default_todo_todo_", &base));
}

// =============================================================================
// Configuration edits
// =============================================================================

#[test]
fn test_add_jobs_keeps_existing_jobs() {
    let config = prometheus_config(&["prometheus", "node-exporter"]);
    let base = job_base_name("todo-app", "todo", "todo-domain");
    let updated = apply_trait_jobs(&config, &base, &jobs_for("todo-app", "todo-domain", 2))
        .unwrap()
        .unwrap();

    assert_eq!(
        job_names(&updated),
        vec![
            "prometheus",
            "node-exporter",
            "todo-app_default_todo_todo-domain",
            "todo-app_default_todo_todo-domain_1",
        ]
    );
    assert!(updated.contains("scrape_interval"));
}

#[test]
fn test_reapply_is_noop() {
    let base = job_base_name("todo-app", "todo", "todo-domain");
    let jobs = jobs_for("todo-app", "todo-domain", 1);
    let once = apply_trait_jobs(&prometheus_config(&["prometheus"]), &base, &jobs)
        .unwrap()
        .unwrap();
    assert!(apply_trait_jobs(&once, &base, &jobs).unwrap().is_none());
}

#[test]
fn test_shrinking_ports_removes_extra_jobs() {
    let base = job_base_name("todo-app", "todo", "todo-domain");
    let config = apply_trait_jobs(
        &prometheus_config(&["prometheus"]),
        &base,
        &jobs_for("todo-app", "todo-domain", 3),
    )
    .unwrap()
    .unwrap();

    let shrunk = apply_trait_jobs(&config, &base, &jobs_for("todo-app", "todo-domain", 1))
        .unwrap()
        .unwrap();
    assert_eq!(
        job_names(&shrunk),
        vec!["prometheus", "todo-app_default_todo_todo-domain"]
    );
}

#[test]
fn test_two_traits_share_a_scraper() {
    let domain = job_base_name("todo-app", "todo", "todo-domain");
    let mysql = job_base_name("todo-app", "todo", "todo-mysql");
    let config = prometheus_config(&["prometheus"]);
    let config = apply_trait_jobs(&config, &domain, &jobs_for("todo-app", "todo-domain", 1))
        .unwrap()
        .unwrap();
    let config = apply_trait_jobs(&config, &mysql, &jobs_for("todo-app", "todo-mysql", 1))
        .unwrap()
        .unwrap();

    let removed = apply_trait_jobs(&config, &domain, &[]).unwrap().unwrap();
    assert_eq!(
        job_names(&removed),
        vec!["prometheus", "todo-app_default_todo_todo-mysql"]
    );
}

#[test]
fn test_remove_from_config_without_jobs() {
    let base = job_base_name("todo-app", "todo", "todo-domain");
    assert!(
        apply_trait_jobs(&prometheus_config(&["prometheus"]), &base, &[])
            .unwrap()
            .is_none()
    );
    assert!(apply_trait_jobs("", &base, &[]).unwrap().is_none());
}

#[test]
fn test_empty_config_gets_scrape_configs() {
    let base = job_base_name("todo-app", "todo", "todo-domain");
    let updated = apply_trait_jobs("", &base, &jobs_for("todo-app", "todo-domain", 1))
        .unwrap()
        .unwrap();
    assert_eq!(job_names(&updated), vec!["todo-app_default_todo_todo-domain"]);
}

#[test]
fn test_invalid_config_rejected() {
    let base = job_base_name("todo-app", "todo", "todo-domain");
    assert!(apply_trait_jobs("- just\n- a list\n", &base, &[]).is_err());
}

// =============================================================================
// Job content
// =============================================================================

#[test]
fn test_https_job_with_basic_auth() {
    let job = build_scrape_job(&JobParams {
        app: "todo-app",
        component: "todo-domain",
        namespace: "todo",
        cluster_name: "managed1",
        port_index: 1,
        https: true,
        basic_auth: Some(BasicAuth {
            username: "weblogic".to_string(),
            password: "welcome1".to_string(),
        }),
    });
    assert_eq!(job.scheme, "https");
    assert!(job.tls_config.is_some());

    let yaml = serde_yaml::to_string(&job).unwrap();
    assert!(yaml.contains("username: weblogic"));
    assert!(yaml.contains("__meta_kubernetes_pod_annotation_verrazzano_io_metricsEnabled1"));
    assert!(yaml.contains("replacement: managed1"));
    assert!(yaml.contains("true;todo-app;todo-domain"));
}
