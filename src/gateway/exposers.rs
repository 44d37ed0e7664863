//! Exposers: make a gateway reachable from the test process.

use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::hostname::{Hostname, StaticHostname};
use super::Gateway;
use crate::config::settings::ExposerChoice;
use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::route::{route, Route, Termination};
use crate::kubernetes::resource::{Lifecycle, Resource};

/// API group whose presence marks an OpenShift cluster
pub const OPENSHIFT_ROUTE_GROUP: &str = "route.openshift.io";

/// Turns a gateway's Service into a hostname clients can use
///
/// Exposers own whatever they create for that purpose and remove it on
/// `delete`.
#[async_trait]
pub trait Exposer: Lifecycle {
    /// Domain hostnames are created under; gateways listen on `*.<base_domain>`
    fn base_domain(&self) -> String;

    async fn expose_hostname(&self, name: &str, gateway: &dyn Gateway) -> Result<Box<dyn Hostname>>;
}

/// OpenShift Routes with edge or passthrough termination
#[derive(Debug)]
pub struct OpenShiftExposer {
    cluster: ClusterClient,
    base_domain: String,
    passthrough: bool,
    routes: Mutex<Vec<Resource<Route>>>,
}

impl OpenShiftExposer {
    pub fn new(cluster: &ClusterClient, base_domain: impl Into<String>, passthrough: bool) -> Self {
        Self {
            cluster: cluster.clone(),
            base_domain: base_domain.into(),
            passthrough,
            routes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Lifecycle for OpenShiftExposer {
    fn describe(&self) -> String {
        format!("OpenShiftExposer/{}", self.base_domain)
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        let routes = std::mem::take(&mut *self.routes.lock().await);
        let mut first_error = None;
        for route in routes.iter().rev() {
            if let Err(e) = route.delete().await {
                warn!(route = %route.name(), error = %e, "Failed to delete exposer route");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn wait_for_ready(&self) -> bool {
        true
    }
}

#[async_trait]
impl Exposer for OpenShiftExposer {
    fn base_domain(&self) -> String {
        self.base_domain.clone()
    }

    async fn expose_hostname(&self, name: &str, gateway: &dyn Gateway) -> Result<Box<dyn Hostname>> {
        let host = format!("{}.{}", name, self.base_domain);
        let termination = if self.passthrough {
            Termination::Passthrough
        } else {
            Termination::Edge
        };
        let cluster = self.cluster.change_project(gateway.namespace());
        let resource = route(&cluster, name, &gateway.service_name(), None, Some(termination));
        resource
            .modify(|r| r.spec.host = Some(host.clone()))
            .await?;
        resource.commit().await?;
        let admitted = Lifecycle::wait_for_ready(&resource).await;
        let hostname = resource.hostname().await.unwrap_or_else(|| host.clone());
        self.routes.lock().await.push(resource);
        if !admitted {
            return Err(Error::control_plane(format!("route {} was not admitted", name)));
        }

        info!(hostname = %hostname, ?termination, "Exposed gateway through route");
        let exposed = if self.passthrough {
            let cert = gateway.get_tls_cert(&hostname).await?;
            StaticHostname::https(hostname, cert.as_ref())
        } else {
            StaticHostname::https(hostname, None)
        };
        Ok(Box::new(exposed))
    }
}

/// LoadBalancer Services addressed as `<name>.<ip>.nip.io`
///
/// The client resolves the name to the load balancer statically, so nip.io
/// itself is never queried.
#[derive(Debug, Default)]
pub struct LoadBalancerServiceExposer;

impl LoadBalancerServiceExposer {
    pub fn new() -> Self {
        Self
    }
}

/// IP of a load balancer address that may be a hostname (e.g. on AWS)
async fn load_balancer_ip(address: &str) -> Result<IpAddr> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }
    let mut addrs = tokio::net::lookup_host((address, 0)).await.map_err(|e| Error::Io {
        source: e,
        context: format!("resolve load balancer {}", address),
    })?;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| Error::control_plane(format!("load balancer {} has no addresses", address)))
}

#[async_trait]
impl Lifecycle for LoadBalancerServiceExposer {
    fn describe(&self) -> String {
        "LoadBalancerServiceExposer".to_string()
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_ready(&self) -> bool {
        true
    }
}

#[async_trait]
impl Exposer for LoadBalancerServiceExposer {
    fn base_domain(&self) -> String {
        "nip.io".to_string()
    }

    async fn expose_hostname(&self, name: &str, gateway: &dyn Gateway) -> Result<Box<dyn Hostname>> {
        let ip = load_balancer_ip(&gateway.external_ip().await?).await?;
        let host = format!("{}.{}.{}", name, ip, self.base_domain());
        let cert = gateway.get_tls_cert(&host).await?;
        let (exposed, port) = match cert {
            Some(cert) => (StaticHostname::https(&host, Some(&cert)), 443),
            None => (StaticHostname::http(&host), 80),
        };
        debug!(hostname = %host, %ip, "Exposed gateway through load balancer");
        Ok(Box::new(exposed.resolved_to(SocketAddr::new(ip, port))))
    }
}

/// Names under a zone the DNS controller manages; resolved through real DNS
#[derive(Debug)]
pub struct DnsPolicyExposer {
    base_domain: String,
}

impl DnsPolicyExposer {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into(),
        }
    }
}

#[async_trait]
impl Lifecycle for DnsPolicyExposer {
    fn describe(&self) -> String {
        format!("DnsPolicyExposer/{}", self.base_domain)
    }

    async fn commit(&self) -> Result<()> {
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        Ok(())
    }

    async fn wait_for_ready(&self) -> bool {
        true
    }
}

#[async_trait]
impl Exposer for DnsPolicyExposer {
    fn base_domain(&self) -> String {
        self.base_domain.clone()
    }

    async fn expose_hostname(&self, name: &str, gateway: &dyn Gateway) -> Result<Box<dyn Hostname>> {
        let host = format!("{}.{}", name, self.base_domain);
        let exposed = match gateway.get_tls_cert(&host).await? {
            Some(cert) => StaticHostname::https(host, Some(&cert)),
            None => StaticHostname::http(host),
        };
        Ok(Box::new(exposed))
    }
}

/// Exposer selection, from `default_exposer` or API discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposerKind {
    OpenShift,
    LoadBalancer,
    DnsPolicy,
}

impl std::str::FromStr for ExposerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openshift" | "route" => Ok(Self::OpenShift),
            "kubernetes" | "loadbalancer" | "load_balancer" => Ok(Self::LoadBalancer),
            "dns" | "dnspolicy" | "dns_policy" => Ok(Self::DnsPolicy),
            other => Err(Error::config(format!("unknown exposer '{}'", other))),
        }
    }
}

impl ExposerKind {
    /// The configured kind; `auto` picks OpenShift when Routes are served,
    /// else LoadBalancer
    pub async fn detect(cluster: &ClusterClient, choice: ExposerChoice) -> Result<Self> {
        match choice {
            ExposerChoice::Openshift => Ok(Self::OpenShift),
            ExposerChoice::Kubernetes => Ok(Self::LoadBalancer),
            ExposerChoice::Dnspolicy => Ok(Self::DnsPolicy),
            ExposerChoice::Auto => {
                if cluster.has_api_group(OPENSHIFT_ROUTE_GROUP).await? {
                    Ok(Self::OpenShift)
                } else {
                    Ok(Self::LoadBalancer)
                }
            }
        }
    }

    pub fn build(self, cluster: &ClusterClient, base_domain: &str, passthrough: bool) -> Box<dyn Exposer> {
        match self {
            Self::OpenShift => Box::new(OpenShiftExposer::new(cluster, base_domain, passthrough)),
            Self::LoadBalancer => Box::new(LoadBalancerServiceExposer::new()),
            Self::DnsPolicy => Box::new(DnsPolicyExposer::new(base_domain)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Reference, Referencable};
    use crate::utils::certificates::TlsMaterial;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug)]
    struct FixedGateway {
        address: String,
    }

    impl Referencable for FixedGateway {
        fn reference(&self) -> Reference {
            Reference::gateway("gw", "kuadrant")
        }
    }

    #[async_trait]
    impl Lifecycle for FixedGateway {
        fn describe(&self) -> String {
            "FixedGateway".to_string()
        }
        async fn commit(&self) -> Result<()> {
            Ok(())
        }
        async fn delete(&self) -> Result<()> {
            Ok(())
        }
        async fn wait_for_ready(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl Gateway for FixedGateway {
        fn name(&self) -> &str {
            "gw"
        }
        fn namespace(&self) -> &str {
            "kuadrant"
        }
        fn service_name(&self) -> String {
            "gw-istio".to_string()
        }
        async fn external_ip(&self) -> Result<String> {
            Ok(self.address.clone())
        }
        async fn get_tls_cert(&self, _hostname: &str) -> Result<Option<TlsMaterial>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn load_balancer_hostname_embeds_the_ip() {
        let gateway = FixedGateway {
            address: "10.1.2.3".to_string(),
        };
        let hostname = LoadBalancerServiceExposer::new()
            .expose_hostname("httpbin-ab12c", &gateway)
            .await
            .unwrap();
        assert_eq!(hostname.hostname(), "httpbin-ab12c.10.1.2.3.nip.io");
        assert_eq!(hostname.url(), "http://httpbin-ab12c.10.1.2.3.nip.io");
    }

    #[tokio::test]
    async fn dns_exposer_uses_the_managed_zone() {
        let gateway = FixedGateway {
            address: "10.1.2.3".to_string(),
        };
        let hostname = DnsPolicyExposer::new("zone.example.com")
            .expose_hostname("api", &gateway)
            .await
            .unwrap();
        assert_eq!(hostname.hostname(), "api.zone.example.com");
    }

    #[test]
    fn exposer_names_parse() {
        assert_eq!("openshift".parse::<ExposerKind>().unwrap(), ExposerKind::OpenShift);
        assert_eq!("Kubernetes".parse::<ExposerKind>().unwrap(), ExposerKind::LoadBalancer);
        assert_eq!("dns".parse::<ExposerKind>().unwrap(), ExposerKind::DnsPolicy);
        assert!("ingress".parse::<ExposerKind>().is_err());
    }

    #[tokio::test]
    async fn detects_openshift_from_discovery() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "APIGroupList",
                "apiVersion": "v1",
                "groups": [{
                    "name": "route.openshift.io",
                    "versions": [{"groupVersion": "route.openshift.io/v1", "version": "v1"}],
                    "preferredVersion": {"groupVersion": "route.openshift.io/v1", "version": "v1"}
                }]
            })))
            .mount(&server)
            .await;
        let cluster = crate::kubernetes::test_cluster(&server.uri());
        assert_eq!(
            ExposerKind::detect(&cluster, ExposerChoice::Auto).await.unwrap(),
            ExposerKind::OpenShift
        );
        assert_eq!(
            ExposerKind::detect(&cluster, ExposerChoice::Kubernetes).await.unwrap(),
            ExposerKind::LoadBalancer
        );
    }
}
