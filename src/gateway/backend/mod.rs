//! Test backends: a Deployment plus a Service reachable in-cluster at
//! `name.namespace.svc.cluster.local:port`.

pub mod httpbin;
pub mod llm_sim;
pub mod mockserver;
pub mod spicedb;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use super::{Reference, Referencable};
use crate::errors::Result;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::deployment::DeploymentBuilder;
use crate::kubernetes::objects::service::{service, ServicePort, ServiceType};
use crate::kubernetes::resource::{Lifecycle, Resource};

pub use httpbin::httpbin;
pub use llm_sim::llm_sim;
pub use mockserver::{mockserver, MockserverClient};
pub use spicedb::SpiceDb;

/// Route backend reference (`backendRefs[]` entry)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackendRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub port: i32,
}

impl BackendRef {
    /// Same-namespace Service
    pub fn service(name: impl Into<String>, port: i32) -> Self {
        Self {
            group: None,
            kind: Some("Service".to_string()),
            name: name.into(),
            namespace: None,
            port,
        }
    }
}

/// Anything an HTTPRoute can route to
pub trait Backend: Lifecycle + Referencable {
    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    fn port(&self) -> i32;

    fn backend_ref(&self) -> BackendRef {
        BackendRef {
            namespace: Some(self.namespace().to_string()),
            ..BackendRef::service(self.name(), self.port())
        }
    }

    /// `host:port` inside the cluster
    fn url(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local:{}",
            self.name(),
            self.namespace(),
            self.port()
        )
    }
}

/// Deployment + Service pair, plus objects they need first (secrets, config)
pub struct ServiceBackend {
    name: String,
    namespace: String,
    port: i32,
    companions: Vec<Box<dyn Lifecycle>>,
    deployment: Resource<Deployment>,
    service: Resource<Service>,
}

impl std::fmt::Debug for ServiceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceBackend")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("port", &self.port)
            .field("companions", &self.companions.len())
            .finish()
    }
}

impl ServiceBackend {
    /// Expose `deployment` on `port` (named `http`) through a ClusterIP Service
    pub fn new(
        cluster: &ClusterClient,
        deployment: DeploymentBuilder,
        port: i32,
        target_port: i32,
        labels: BTreeMap<String, String>,
    ) -> Self {
        let selector = deployment.selector();
        let deployment = deployment.build(cluster);
        let name = deployment.name().to_string();
        let namespace = deployment.namespace().to_string();
        let service = service(
            cluster,
            &name,
            selector,
            &[ServicePort::new("http", port, target_port)],
            ServiceType::ClusterIp,
            labels,
            None::<Duration>,
        );
        Self {
            name,
            namespace,
            port,
            companions: Vec::new(),
            deployment,
            service,
        }
    }

    /// Object committed before and deleted after the deployment
    pub fn with_companion(mut self, companion: impl Lifecycle + 'static) -> Self {
        self.companions.push(Box::new(companion));
        self
    }

    pub fn deployment(&self) -> &Resource<Deployment> {
        &self.deployment
    }

    pub fn service(&self) -> &Resource<Service> {
        &self.service
    }
}

impl Referencable for ServiceBackend {
    fn reference(&self) -> Reference {
        Reference::service(&self.name, &self.namespace)
    }
}

#[async_trait]
impl Lifecycle for ServiceBackend {
    fn describe(&self) -> String {
        format!("Backend/{}/{}", self.namespace, self.name)
    }

    async fn commit(&self) -> Result<()> {
        for companion in &self.companions {
            companion.commit().await?;
        }
        self.deployment.commit().await?;
        self.service.commit().await
    }

    /// Deletes everything in reverse order; the first failure is reported
    async fn delete(&self) -> Result<()> {
        let mut first_error = None;
        let service = Lifecycle::delete(&self.service).await;
        let deployment = Lifecycle::delete(&self.deployment).await;
        let mut results = vec![service, deployment];
        for companion in self.companions.iter().rev() {
            results.push(companion.delete().await);
        }
        for result in results {
            if let Err(e) = result {
                warn!(backend = %self.name, error = %e, "Backend cleanup step failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn wait_for_ready(&self) -> bool {
        Lifecycle::wait_for_ready(&self.deployment).await
            && Lifecycle::wait_for_ready(&self.service).await
    }
}

impl Backend for ServiceBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn port(&self) -> i32 {
        self.port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::offline_cluster;

    #[test]
    fn backend_ref_serializes_service_kind() {
        let value = serde_json::to_value(BackendRef::service("httpbin", 8080)).unwrap();
        assert_eq!(value, serde_json::json!({"kind": "Service", "name": "httpbin", "port": 8080}));
    }

    #[tokio::test]
    async fn service_backend_url_and_ref() {
        let backend = httpbin(
            &offline_cluster(),
            "httpbin-ab12c",
            "basic",
            "quay.io/trepel/httpbin:jsmadis",
            1,
        );
        assert_eq!(backend.url(), "httpbin-ab12c.kuadrant.svc.cluster.local:8080");
        assert_eq!(backend.backend_ref().namespace.as_deref(), Some("kuadrant"));
        assert_eq!(backend.describe(), "Backend/kuadrant/httpbin-ab12c");
        assert!(!backend.deployment().is_committed());
    }
}
