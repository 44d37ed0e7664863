//! Route view over the Envoy gateway's virtual host.

use async_trait::async_trait;
use std::sync::Arc;

use super::EnvoyGateway;
use crate::errors::Result;
use crate::gateway::http_route::HttpRouteRule;
use crate::gateway::{GatewayRoute, Reference, Referencable};
use crate::kubernetes::resource::Lifecycle;

/// Hostnames and rules edited directly in the Envoy bootstrap
///
/// There is no separate object on the cluster; every change rewrites the
/// gateway's ConfigMap and restarts Envoy when it is running.
#[derive(Debug, Clone)]
pub struct EnvoyVirtualRoute {
    gateway: Arc<EnvoyGateway>,
}

impl EnvoyVirtualRoute {
    pub fn new(gateway: Arc<EnvoyGateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<EnvoyGateway> {
        &self.gateway
    }
}

impl Referencable for EnvoyVirtualRoute {
    fn reference(&self) -> Reference {
        self.gateway.reference()
    }
}

#[async_trait]
impl Lifecycle for EnvoyVirtualRoute {
    fn describe(&self) -> String {
        format!("EnvoyVirtualRoute/{}", self.gateway.describe())
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.gateway
            .update_bootstrap(|b| {
                b.clear_hostnames();
                b.clear_rules();
            })
            .await
    }

    async fn wait_for_ready(&self) -> bool {
        true
    }
}

#[async_trait]
impl GatewayRoute for EnvoyVirtualRoute {
    async fn add_hostname(&self, hostname: &str) -> Result<()> {
        self.gateway.update_bootstrap(|b| b.add_hostname(hostname)).await
    }

    async fn remove_hostname(&self, hostname: &str) -> Result<()> {
        self.gateway.update_bootstrap(|b| b.remove_hostname(hostname)).await
    }

    async fn remove_all_hostnames(&self) -> Result<()> {
        self.gateway.update_bootstrap(|b| b.clear_hostnames()).await
    }

    async fn add_rule(&self, rule: HttpRouteRule) -> Result<()> {
        self.gateway.update_bootstrap(|b| b.add_rule(rule)).await
    }

    async fn remove_rule(&self, rule: &HttpRouteRule) -> Result<()> {
        self.gateway.update_bootstrap(|b| b.remove_rule(rule)).await
    }

    async fn remove_all_rules(&self) -> Result<()> {
        self.gateway.update_bootstrap(|b| b.clear_rules()).await
    }

    /// Envoy routes carry no status
    async fn is_affected_by(&self, _kind: &str, _policy: &Reference) -> bool {
        false
    }
}
