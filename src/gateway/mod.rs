//! # Gateways, routes, and backends
//!
//! A [`Gateway`] is anything a policy can target and a client can reach: the
//! operator-managed Gateway API gateway, an Envoy deployment fronting the
//! authorization service, or a plain Service facade. A [`GatewayRoute`]
//! binds hostnames and backends to a gateway. Exposers turn a gateway into
//! an externally resolvable [`Hostname`].

pub mod backend;
pub mod envoy;
pub mod exposers;
pub mod gateway_api;
pub mod hostname;
pub mod http_route;
pub mod service_gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::kubernetes::resource::Lifecycle;
use crate::utils::certificates::TlsMaterial;

pub use backend::{Backend, BackendRef};
pub use envoy::{EnvoyBootstrap, EnvoyGateway, EnvoyVirtualRoute};
pub use exposers::{DnsPolicyExposer, Exposer, ExposerKind, LoadBalancerServiceExposer, OpenShiftExposer};
pub use gateway_api::KuadrantGateway;
pub use hostname::{Hostname, StaticHostname};
pub use http_route::{HttpRoute, HttpRouteMatch, HttpRouteRule, PathMatchType};
pub use service_gateway::ServiceGateway;

/// API group of Gateway API objects
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Group/kind/name/namespace of an object usable as a policy target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl Reference {
    pub fn new(
        group: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: Option<String>,
    ) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
            name: name.into(),
            namespace,
        }
    }

    pub fn gateway(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(GATEWAY_API_GROUP, "Gateway", name, Some(namespace.into()))
    }

    pub fn http_route(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(GATEWAY_API_GROUP, "HTTPRoute", name, Some(namespace.into()))
    }

    /// Core-group Service
    pub fn service(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new("", "Service", name, Some(namespace.into()))
    }

    /// `namespace/name`, the form controllers use in status messages
    pub fn namespaced_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}/{}", namespace, self.name),
            None => self.name.clone(),
        }
    }
}

/// Objects that can be named as a policy target or route parent
pub trait Referencable: Send + Sync {
    fn reference(&self) -> Reference;
}

/// Capability set shared by every gateway variant
#[async_trait]
pub trait Gateway: Lifecycle + Referencable {
    fn name(&self) -> &str;

    fn namespace(&self) -> &str;

    /// Service fronting the gateway's data plane; what exposers point at
    fn service_name(&self) -> String;

    /// Address clients connect to, `ip` or `host[:port]`
    async fn external_ip(&self) -> Result<String>;

    /// Certificate served for `hostname`, if the gateway terminates TLS
    async fn get_tls_cert(&self, hostname: &str) -> Result<Option<TlsMaterial>>;
}

/// Hostname and rule operations shared by HTTPRoute and the Envoy virtual route
#[async_trait]
pub trait GatewayRoute: Lifecycle + Referencable {
    async fn add_hostname(&self, hostname: &str) -> Result<()>;

    async fn remove_hostname(&self, hostname: &str) -> Result<()>;

    async fn remove_all_hostnames(&self) -> Result<()>;

    async fn add_rule(&self, rule: HttpRouteRule) -> Result<()>;

    /// Remove every rule equal to `rule`
    async fn remove_rule(&self, rule: &HttpRouteRule) -> Result<()>;

    async fn remove_all_rules(&self) -> Result<()>;

    /// Route `prefix` to `backend`
    async fn add_backend(&self, backend: &dyn Backend, prefix: &str) -> Result<()> {
        self.add_rule(HttpRouteRule::path_prefix(prefix, backend.backend_ref()))
            .await
    }

    /// Whether the route reports being affected by the policy of `kind` at `policy`
    async fn is_affected_by(&self, kind: &str, policy: &Reference) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_serializes_like_a_target_ref() {
        let reference = Reference::gateway("gw-abc12", "kuadrant");
        let value = serde_json::to_value(&reference).unwrap();
        assert_eq!(value["group"], "gateway.networking.k8s.io");
        assert_eq!(value["kind"], "Gateway");
        assert_eq!(reference.namespaced_name(), "kuadrant/gw-abc12");
    }

    #[test]
    fn service_reference_has_core_group() {
        let reference = Reference::service("httpbin", "kuadrant");
        assert_eq!(reference.group, "");
        assert_eq!(reference.kind, "Service");
    }
}
