//! Plain Service presented as a gateway.
//!
//! Metrics scenarios scrape component Services (the rate limiter, the
//! authorization service) that are not gateways at all; this facade lets
//! exposers and the HTTP client treat them uniformly.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;

use super::{Reference, Referencable};
use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Lifecycle, Resource};
use crate::utils::certificates::TlsMaterial;

/// Existing Service addressed through its metrics port
///
/// The Service belongs to the installation, not the test: `commit` and
/// `delete` never touch the cluster.
#[derive(Debug)]
pub struct ServiceGateway {
    service: Resource<Service>,
    port_name: String,
}

impl ServiceGateway {
    pub async fn existing(cluster: &ClusterClient, name: &str, port_name: &str) -> Result<Self> {
        Ok(Self {
            service: cluster.get_service(name).await?,
            port_name: port_name.to_string(),
        })
    }

    pub fn service(&self) -> &Resource<Service> {
        &self.service
    }

    /// Number of the named port
    pub async fn port(&self) -> Result<i32> {
        self.service.port(&self.port_name).await.ok_or_else(|| {
            Error::control_plane(format!(
                "service {} has no port named {}",
                self.service.name(),
                self.port_name
            ))
        })
    }

    /// In-cluster metrics URL, `http://<svc dns>:<port>/metrics`
    pub async fn metrics_url(&self) -> Result<String> {
        Ok(format!(
            "http://{}:{}/metrics",
            self.service.cluster_dns(),
            self.port().await?
        ))
    }
}

impl Referencable for ServiceGateway {
    fn reference(&self) -> Reference {
        Reference::service(self.service.name(), self.service.namespace())
    }
}

#[async_trait]
impl Lifecycle for ServiceGateway {
    fn describe(&self) -> String {
        format!("ServiceGateway/{}", self.service.describe())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_ready(&self) -> bool {
        Lifecycle::wait_for_ready(&self.service).await
    }
}

#[async_trait]
impl super::Gateway for ServiceGateway {
    fn name(&self) -> &str {
        self.service.name()
    }

    fn namespace(&self) -> &str {
        self.service.namespace()
    }

    fn service_name(&self) -> String {
        self.service.name().to_string()
    }

    /// Load balancer address when there is one, otherwise the cluster DNS name
    async fn external_ip(&self) -> Result<String> {
        self.service.refresh().await?;
        match self.service.external_ip().await {
            Some(ip) => Ok(ip),
            None => Ok(format!("{}:{}", self.service.cluster_dns(), self.port().await?)),
        }
    }

    async fn get_tls_cert(&self, _hostname: &str) -> Result<Option<TlsMaterial>> {
        Ok(None)
    }
}
