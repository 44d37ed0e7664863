//! networking.k8s.io/v1 Ingress builder.

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use kube::api::ObjectMeta;

use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Readiness, Resource};

impl Readiness for Ingress {
    fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .map(|ingress| !ingress.is_empty())
            .unwrap_or(false)
    }
}

/// Uncommitted Ingress routing `host` + `/` prefix to `service:port`
pub fn ingress(
    cluster: &ClusterClient,
    name: &str,
    host: &str,
    service: &str,
    port: i32,
) -> Resource<Ingress> {
    Resource::new(
        cluster,
        Ingress {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            spec: Some(IngressSpec {
                rules: Some(vec![IngressRule {
                    host: Some(host.to_string()),
                    http: Some(HTTPIngressRuleValue {
                        paths: vec![HTTPIngressPath {
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                            backend: IngressBackend {
                                service: Some(IngressServiceBackend {
                                    name: service.to_string(),
                                    port: Some(ServiceBackendPort {
                                        number: Some(port),
                                        ..ServiceBackendPort::default()
                                    }),
                                }),
                                ..IngressBackend::default()
                            },
                        }],
                    }),
                }]),
                ..IngressSpec::default()
            }),
            ..Ingress::default()
        },
    )
}

impl Resource<Ingress> {
    pub async fn hosts(&self) -> Vec<String> {
        self.read(|i| {
            i.spec
                .as_ref()
                .and_then(|s| s.rules.as_ref())
                .map(|rules| rules.iter().filter_map(|r| r.host.clone()).collect())
                .unwrap_or_default()
        })
        .await
    }
}
