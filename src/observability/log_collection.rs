//! # Failure Log Collection
//!
//! When a test fails, pull the logs of the components it declared interest
//! in, from the test start onwards, into the artifact tree. Collection is
//! opt-in per test and never fails the run: a container whose logs cannot
//! be fetched gets an `-error.txt` file next to where its log would be.

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::artifacts::ArtifactLayout;
use crate::config::settings::{ComponentSelectorSettings, Settings};
use crate::errors::Result;
use crate::kubernetes::client::ClusterClient;
use crate::utils::timeout::{with_timeout, LOG_COLLECTION_TIMEOUT};

/// How to find the pods of one component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentSelector {
    pub namespace: String,
    pub selector: String,
    pub fallback_selector: Option<String>,
}

impl ComponentSelector {
    pub fn new(namespace: &str, selector: &str, fallback: Option<&str>) -> Self {
        Self {
            namespace: namespace.to_string(),
            selector: selector.to_string(),
            fallback_selector: fallback.map(str::to_string),
        }
    }
}

/// Built-in selectors
///
/// Gateways run next to the routes under test in `project`; every other
/// component runs in `system_project`.
pub fn default_components(system_project: &str, project: &str) -> BTreeMap<String, ComponentSelector> {
    let mut components: BTreeMap<String, ComponentSelector> = [
        ("authorino", "authorino-resource=authorino", Some("app=authorino")),
        ("limitador", "app=limitador", Some("limitador-resource=limitador")),
        (
            "kuadrant-operator",
            "app=kuadrant,control-plane=controller-manager",
            Some("app.kubernetes.io/name=kuadrant-operator"),
        ),
        (
            "authorino-operator",
            "control-plane=authorino-operator",
            Some("app.kubernetes.io/name=authorino-operator"),
        ),
        (
            "limitador-operator",
            "app=limitador-operator",
            Some("app.kubernetes.io/name=limitador-operator"),
        ),
        (
            "dns-operator",
            "control-plane=dns-operator-controller-manager",
            Some("app.kubernetes.io/name=dns-operator"),
        ),
    ]
    .into_iter()
    .map(|(name, selector, fallback)| {
        (
            name.to_string(),
            ComponentSelector::new(system_project, selector, fallback),
        )
    })
    .collect();
    components.insert(
        "gateway".to_string(),
        ComponentSelector::new(
            project,
            "gateway.networking.k8s.io/gateway-name",
            Some("istio=ingressgateway"),
        ),
    );
    components
}

/// Header written at the top of every collected log
pub fn header(component: &str, pod: &str, container: &str, namespace: &str, since: DateTime<Utc>) -> String {
    format!(
        "# component: {}\n# pod: {}\n# container: {}\n# namespace: {}\n# since: {}\n# collected: {}\n# ---\n",
        component,
        pod,
        container,
        namespace,
        since.to_rfc3339_opts(SecondsFormat::Secs, true),
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Files produced by one collection run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectionReport {
    pub logs: Vec<PathBuf>,
    pub errors: Vec<PathBuf>,
}

impl CollectionReport {
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty() && self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LogCollector {
    cluster: ClusterClient,
    layout: ArtifactLayout,
    components: BTreeMap<String, ComponentSelector>,
}

impl LogCollector {
    pub fn new(cluster: ClusterClient, layout: ArtifactLayout, components: BTreeMap<String, ComponentSelector>) -> Self {
        Self {
            cluster,
            layout,
            components,
        }
    }

    /// Defaults overlaid with `log_components` from the settings
    pub fn from_settings(cluster: ClusterClient, settings: &Settings) -> Self {
        let projects = &settings.service_protection;
        let system_project = &projects.system_project;
        let mut components = default_components(system_project, &projects.project);
        for (name, configured) in &settings.log_components {
            components.insert(name.clone(), from_settings(configured, system_project));
        }
        Self::new(
            cluster,
            ArtifactLayout::for_worker(&settings.artifacts.root),
            components,
        )
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn components(&self) -> &BTreeMap<String, ComponentSelector> {
        &self.components
    }

    /// Collect logs of `enabled` components since `since`
    ///
    /// An empty `enabled` list collects nothing.
    pub async fn collect(&self, test_name: &str, since: DateTime<Utc>, enabled: &[String]) -> CollectionReport {
        let mut report = CollectionReport::default();
        if enabled.is_empty() {
            debug!(test = test_name, "No log components enabled, skipping collection");
            return report;
        }

        for component in enabled {
            let Some(selector) = self.components.get(component) else {
                warn!(component = %component, "Unknown log component, skipping");
                continue;
            };
            let cluster = self.cluster.change_project(&selector.namespace);
            let pods = match self.select_pods(&cluster, selector).await {
                Ok(pods) => pods,
                Err(e) => {
                    let path = self.layout.error_file(test_name, component, "pods", "list");
                    write_artifact(&path, &format!("Failed to list pods: {}\n", e), &mut report.errors).await;
                    continue;
                }
            };

            for pod in pods {
                let Some(pod_name) = pod.metadata.name.clone() else {
                    continue;
                };
                let containers: Vec<String> = pod
                    .spec
                    .as_ref()
                    .map(|s| s.containers.iter().map(|c| c.name.clone()).collect())
                    .unwrap_or_default();
                for container in containers {
                    let logs = with_timeout(
                        LOG_COLLECTION_TIMEOUT,
                        "pod logs",
                        cluster.pod_logs(&pod_name, &container, Some(since)),
                    )
                    .await;
                    match logs {
                        Ok(logs) => {
                            let path = self.layout.log_file(test_name, component, &pod_name, &container);
                            let content = format!(
                                "{}{}",
                                header(component, &pod_name, &container, &selector.namespace, since),
                                logs
                            );
                            write_artifact(&path, &content, &mut report.logs).await;
                        }
                        Err(e) => {
                            let path = self.layout.error_file(test_name, component, &pod_name, &container);
                            let content = format!(
                                "{}Failed to collect logs: {}\n",
                                header(component, &pod_name, &container, &selector.namespace, since),
                                e
                            );
                            write_artifact(&path, &content, &mut report.errors).await;
                        }
                    }
                }
            }
        }

        info!(
            test = test_name,
            logs = report.logs.len(),
            errors = report.errors.len(),
            "Collected component logs"
        );
        report
    }

    async fn select_pods(&self, cluster: &ClusterClient, selector: &ComponentSelector) -> Result<Vec<Pod>> {
        let pods = cluster.pods(&selector.selector).await?;
        if !pods.is_empty() {
            return Ok(pods);
        }
        match &selector.fallback_selector {
            Some(fallback) => {
                debug!(primary = %selector.selector, %fallback, "No pods for primary selector");
                cluster.pods(fallback).await
            }
            None => Ok(pods),
        }
    }
}

fn from_settings(configured: &ComponentSelectorSettings, system_project: &str) -> ComponentSelector {
    ComponentSelector {
        namespace: configured
            .namespace
            .clone()
            .unwrap_or_else(|| system_project.to_string()),
        selector: configured.selector.clone(),
        fallback_selector: configured.fallback_selector.clone(),
    }
}

async fn write_artifact(path: &Path, content: &str, written: &mut Vec<PathBuf>) {
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!(path = %parent.display(), error = %e, "Failed to create artifact directory");
            return;
        }
    }
    match tokio::fs::write(path, content).await {
        Ok(()) => written.push(path.to_path_buf()),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::test_cluster;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn pod_list(pods: Vec<(&str, Vec<&str>)>) -> serde_json::Value {
        let items: Vec<_> = pods
            .into_iter()
            .map(|(name, containers)| {
                json!({
                    "metadata": {"name": name, "namespace": "kuadrant-system"},
                    "spec": {"containers": containers.iter().map(|c| json!({"name": c})).collect::<Vec<_>>()}
                })
            })
            .collect();
        json!({"apiVersion": "v1", "kind": "PodList", "metadata": {}, "items": items})
    }

    fn collector(uri: &str, root: &Path) -> LogCollector {
        LogCollector::new(
            test_cluster(uri),
            ArtifactLayout::new(root, "gw0"),
            default_components("kuadrant-system", "kuadrant"),
        )
    }

    #[test]
    fn header_has_seven_lines() {
        let since: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let header = header("authorino", "authorino-1", "authorino", "kuadrant-system", since);
        assert_eq!(header.lines().count(), 7);
        assert!(header.contains("# since: 2024-05-01T10:00:00Z"));
    }

    #[tokio::test]
    async fn nothing_enabled_collects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let report = collector("http://127.0.0.1:1", dir.path())
            .collect("t", Utc::now(), &[])
            .await;
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn fallback_selector_and_error_files() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant-system/pods"))
            .and(query_param("labelSelector", "authorino-resource=authorino"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pod_list(vec![])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant-system/pods"))
            .and(query_param("labelSelector", "app=authorino"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pod_list(vec![("authorino-7d9f", vec!["authorino", "proxy"])])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant-system/pods/authorino-7d9f/log"))
            .and(query_param("container", "authorino"))
            .respond_with(ResponseTemplate::new(200).set_body_string("2024-05-01T10:00:01Z {\"level\":\"info\"}\n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant-system/pods/authorino-7d9f/log"))
            .and(query_param("container", "proxy"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "kind": "Status", "apiVersion": "v1", "status": "Failure",
                "message": "container not ready", "reason": "InternalError", "code": 500
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let collector = collector(&server.uri(), dir.path());
        let report = collector
            .collect(
                "test_auth",
                Utc::now(),
                &["authorino".to_string(), "unknown".to_string()],
            )
            .await;

        assert_eq!(report.logs.len(), 1);
        assert_eq!(report.errors.len(), 1);
        let log = std::fs::read_to_string(&report.logs[0]).unwrap();
        assert!(log.starts_with("# component: authorino\n# pod: authorino-7d9f\n"));
        assert!(log.ends_with("{\"level\":\"info\"}\n"));
        assert!(report.errors[0].ends_with("gw0/test_auth/authorino-authorino-7d9f-proxy-error.txt"));
    }

    #[tokio::test]
    async fn configured_components_default_to_system_project() {
        let mut settings = Settings::default();
        settings.log_components.insert(
            "llm-sim".to_string(),
            ComponentSelectorSettings {
                namespace: None,
                selector: "app=llm-sim".to_string(),
                fallback_selector: None,
            },
        );
        let collector = LogCollector::from_settings(crate::kubernetes::offline_cluster(), &settings);
        let sim = &collector.components()["llm-sim"];
        assert_eq!(sim.namespace, settings.service_protection.system_project);
        assert!(collector.components().contains_key("dns-operator"));
    }

    #[tokio::test]
    async fn gateways_are_looked_up_in_the_test_project() {
        let settings = Settings::default();
        let collector = LogCollector::from_settings(crate::kubernetes::offline_cluster(), &settings);
        let gateway = &collector.components()["gateway"];
        assert_eq!(gateway.namespace, settings.service_protection.project);
        assert_eq!(gateway.selector, "gateway.networking.k8s.io/gateway-name");
        assert_eq!(
            collector.components()["limitador"].namespace,
            settings.service_protection.system_project
        );
    }

    #[tokio::test]
    async fn logs_are_fetched_from_the_test_start() {
        let since: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant/pods"))
            .and(query_param("labelSelector", "gateway.networking.k8s.io/gateway-name"))
            .respond_with(ResponseTemplate::new(200).set_body_json(pod_list(vec![("gw-istio-5c7b", vec!["istio-proxy"])])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant/pods/gw-istio-5c7b/log"))
            .and(query_param_is_missing("sinceSeconds"))
            .and(move |request: &Request| {
                request
                    .url
                    .query_pairs()
                    .find(|(key, _)| key == "sinceTime")
                    .and_then(|(_, value)| DateTime::parse_from_rfc3339(&value).ok())
                    .map(|value| value == since)
                    .unwrap_or(false)
            })
            .respond_with(ResponseTemplate::new(200).set_body_string("2024-05-01T10:00:02Z request\n"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let report = collector(&server.uri(), dir.path())
            .collect("test_rate_limit", since, &["gateway".to_string()])
            .await;
        assert_eq!(report.logs.len(), 1, "{:?}", report);
        let log = std::fs::read_to_string(&report.logs[0]).unwrap();
        assert!(log.contains("# namespace: kuadrant\n# since: 2024-05-01T10:00:00Z\n"));
    }
}
