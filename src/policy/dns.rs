//! DNSPolicy (kuadrant.io/v1): DNS records for the listeners of a Gateway.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{policy_object, PolicyStatus, TargetRef};
use crate::errors::{Error, Result};
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::Resource;

/// Secret holding the DNS provider credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ProviderRef {
    pub name: String,
}

/// Weighted, geo-aware record sets
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancing {
    pub weight: u32,
    pub geo: String,
    pub default_geo: bool,
}

impl LoadBalancing {
    pub fn new(geo: impl Into<String>, weight: u32, default_geo: bool) -> Self {
        Self {
            weight,
            geo: geo.into(),
            default_geo,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub path: String,
    pub port: u16,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

impl HealthCheck {
    /// Probe `path` over plain HTTP on port 80
    pub fn http(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port: 80,
            protocol: "HTTP".to_string(),
            failure_threshold: None,
            interval: None,
        }
    }

    pub fn https(path: impl Into<String>) -> Self {
        Self {
            port: 443,
            protocol: "HTTPS".to_string(),
            ..Self::http(path)
        }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "kuadrant.io",
    version = "v1",
    kind = "DNSPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct DNSPolicySpec {
    pub target_ref: TargetRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_refs: Vec<ProviderRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancing: Option<LoadBalancing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_addresses: Vec<String>,
}

policy_object!(DNSPolicy);

/// Uncommitted DNSPolicy; `load_balancing` selects the geo strategy, `None`
/// the simple one
pub fn dns_policy(
    cluster: &ClusterClient,
    name: &str,
    gateway: &dyn Referencable,
    provider_secret: &str,
    load_balancing: Option<LoadBalancing>,
    labels: BTreeMap<String, String>,
) -> Resource<DNSPolicy> {
    let mut object = DNSPolicy::new(
        name,
        DNSPolicySpec {
            target_ref: TargetRef::to(gateway),
            provider_refs: vec![ProviderRef {
                name: provider_secret.to_string(),
            }],
            load_balancing,
            ..DNSPolicySpec::default()
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

impl Resource<DNSPolicy> {
    pub async fn set_health_check(&self, health_check: HealthCheck) -> Result<()> {
        if health_check.path.is_empty() {
            return Err(Error::config("health check path must not be empty"));
        }
        self.modify(|p| p.spec.health_check = Some(health_check.clone()))
            .await
    }

    /// Listener addresses the controller must not publish
    pub async fn exclude_address(&self, address: &str) -> Result<()> {
        self.modify(|p| {
            if !p.spec.exclude_addresses.iter().any(|a| a == address) {
                p.spec.exclude_addresses.push(address.to_string());
            }
        })
        .await
    }
}
