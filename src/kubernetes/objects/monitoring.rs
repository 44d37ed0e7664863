//! Prometheus-operator scrape declarations (monitoring.coreos.com/v1).

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Readiness, Resource};

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_names: Vec<String>,
}

/// One scrape endpoint; shared by both monitor kinds
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MetricsEndpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
}

impl MetricsEndpoint {
    pub fn new(port: &str, path: &str) -> Self {
        Self {
            port: Some(port.to_string()),
            path: Some(path.to_string()),
            interval: Some("10s".to_string()),
            scheme: None,
        }
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    pub selector: LabelSelector,
    pub endpoints: Vec<MetricsEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "PodMonitor",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PodMonitorSpec {
    pub selector: LabelSelector,
    pub pod_metrics_endpoints: Vec<MetricsEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<NamespaceSelector>,
}

// Monitors carry no status; the scrape pools in Prometheus are the readiness signal.
impl Readiness for ServiceMonitor {
    fn is_ready(&self) -> bool {
        true
    }
}

impl Readiness for PodMonitor {
    fn is_ready(&self) -> bool {
        true
    }
}

/// What the metrics client needs to know about a monitor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorRef {
    /// Scrape-pool prefix: `serviceMonitor` or `podMonitor`
    pub pool_prefix: &'static str,
    pub namespace: String,
    pub name: String,
    pub endpoints: usize,
}

impl MonitorRef {
    /// `<prefix>/<namespace>/<name>/<index>`
    pub fn scrape_pool(&self, index: usize) -> String {
        format!("{}/{}/{}/{}", self.pool_prefix, self.namespace, self.name, index)
    }

    pub fn scrape_pools(&self) -> Vec<String> {
        (0..self.endpoints).map(|i| self.scrape_pool(i)).collect()
    }

    /// Whether a scrape pool name belongs to this monitor
    pub fn owns_pool(&self, pool: &str) -> bool {
        pool.strip_prefix(&format!("{}/{}/{}/", self.pool_prefix, self.namespace, self.name))
            .map(|index| index.parse::<usize>().is_ok())
            .unwrap_or(false)
    }
}

fn selector(labels: &[(&str, &str)]) -> LabelSelector {
    LabelSelector {
        match_labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

pub fn service_monitor(
    cluster: &ClusterClient,
    name: &str,
    endpoints: Vec<MetricsEndpoint>,
    match_labels: &[(&str, &str)],
) -> Resource<ServiceMonitor> {
    Resource::new(
        cluster,
        ServiceMonitor::new(
            name,
            ServiceMonitorSpec {
                selector: selector(match_labels),
                endpoints,
                namespace_selector: None,
            },
        ),
    )
}

pub fn pod_monitor(
    cluster: &ClusterClient,
    name: &str,
    endpoints: Vec<MetricsEndpoint>,
    match_labels: &[(&str, &str)],
) -> Resource<PodMonitor> {
    Resource::new(
        cluster,
        PodMonitor::new(
            name,
            PodMonitorSpec {
                selector: selector(match_labels),
                pod_metrics_endpoints: endpoints,
                namespace_selector: None,
            },
        ),
    )
}

impl Resource<ServiceMonitor> {
    pub async fn monitor_ref(&self) -> MonitorRef {
        MonitorRef {
            pool_prefix: "serviceMonitor",
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
            endpoints: self.read(|m| m.spec.endpoints.len()).await,
        }
    }
}

impl Resource<PodMonitor> {
    pub async fn monitor_ref(&self) -> MonitorRef {
        MonitorRef {
            pool_prefix: "podMonitor",
            namespace: self.namespace().to_string(),
            name: self.name().to_string(),
            endpoints: self.read(|m| m.spec.pod_metrics_endpoints.len()).await,
        }
    }
}
