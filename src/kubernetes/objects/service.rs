//! Service wrapper with typed ports and LoadBalancer readiness.

use k8s_openapi::api::core::v1::{Service, ServicePort as KubeServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Readiness, Resource};
use crate::utils::timeout::{LOAD_BALANCER_TIMEOUT, Wait};

/// One exposed port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub port: i32,
    pub target_port: i32,
    pub protocol: String,
}

impl ServicePort {
    pub fn new(name: impl Into<String>, port: i32, target_port: i32) -> Self {
        Self {
            name: name.into(),
            port,
            target_port,
            protocol: "TCP".to_string(),
        }
    }

    fn to_kube(&self) -> KubeServicePort {
        KubeServicePort {
            name: Some(self.name.clone()),
            port: self.port,
            target_port: Some(IntOrString::Int(self.target_port)),
            protocol: Some(self.protocol.clone()),
            ..KubeServicePort::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceType {
    #[default]
    ClusterIp,
    LoadBalancer,
    NodePort,
}

impl ServiceType {
    fn as_str(&self) -> &'static str {
        match self {
            ServiceType::ClusterIp => "ClusterIP",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::NodePort => "NodePort",
        }
    }
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .map(|t| t == "LoadBalancer")
        .unwrap_or(false)
}

/// First ingress IP, falling back to its hostname
fn ingress_address(service: &Service) -> Option<String> {
    let ingress = service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?;
    ingress.ip.clone().or_else(|| ingress.hostname.clone())
}

impl Readiness for Service {
    fn is_ready(&self) -> bool {
        !is_load_balancer(self) || ingress_address(self).is_some()
    }
}

/// Uncommitted Service selecting pods by `selector`
///
/// LoadBalancer services get a 10-minute delete deadline and, in slow
/// environments, an extra settle delay after readiness.
pub fn service(
    cluster: &ClusterClient,
    name: &str,
    selector: BTreeMap<String, String>,
    ports: &[ServicePort],
    service_type: ServiceType,
    labels: BTreeMap<String, String>,
    slow_loadbalancer_delay: Option<Duration>,
) -> Resource<Service> {
    let object = Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            ports: Some(ports.iter().map(ServicePort::to_kube).collect()),
            type_: Some(service_type.as_str().to_string()),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    };
    let resource = Resource::new(cluster, object);
    match service_type {
        ServiceType::LoadBalancer => resource
            .with_delete_timeout(LOAD_BALANCER_TIMEOUT)
            .with_ready_wait(Wait::secs(600).with_interval(Duration::from_secs(5)))
            .with_settle_delay(slow_loadbalancer_delay),
        _ => resource,
    }
}

impl Resource<Service> {
    /// External address: ingress IP, or ingress hostname
    pub async fn external_ip(&self) -> Option<String> {
        self.read(ingress_address).await
    }

    /// Port number by port name
    pub async fn port(&self, name: &str) -> Option<i32> {
        self.read(|s| {
            s.spec
                .as_ref()?
                .ports
                .as_ref()?
                .iter()
                .find(|p| p.name.as_deref() == Some(name))
                .map(|p| p.port)
        })
        .await
    }

    /// `name.namespace.svc.cluster.local`
    pub fn cluster_dns(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name(), self.namespace())
    }
}
