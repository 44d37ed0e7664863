//! OpenShift Route (route.openshift.io/v1).

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::conditions::{all_true, Condition};
use crate::kubernetes::resource::{Readiness, Resource};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    status = "RouteStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub to: RouteTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard_policy: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTarget {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: serde_json::Value,
}

/// TLS termination mode
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    Edge,
    Passthrough,
    Reencrypt,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    pub termination: Termination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStatus {
    #[serde(default)]
    pub ingress: Vec<RouteIngress>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteIngress {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub router_name: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Readiness for Route {
    fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| !s.ingress.is_empty() && s.ingress.iter().all(|i| all_true(&i.conditions)))
            .unwrap_or(false)
    }
}

impl Route {
    /// Host assigned by the router, falling back to the requested host
    pub fn hostname(&self) -> Option<String> {
        self.status
            .as_ref()
            .and_then(|s| s.ingress.first())
            .and_then(|i| i.host.clone())
            .or_else(|| self.spec.host.clone())
    }

    /// `https://` for TLS routes, `http://` otherwise
    pub fn url(&self) -> Option<String> {
        let scheme = if self.spec.tls.is_some() { "https" } else { "http" };
        self.hostname().map(|host| format!("{}://{}", scheme, host))
    }
}

/// Uncommitted Route exposing `service` with optional TLS termination
pub fn route(
    cluster: &ClusterClient,
    name: &str,
    service: &str,
    target_port: Option<&str>,
    termination: Option<Termination>,
) -> Resource<Route> {
    let spec = RouteSpec {
        to: RouteTarget {
            kind: "Service".to_string(),
            name: service.to_string(),
            weight: None,
        },
        port: target_port.map(|p| RoutePort {
            target_port: serde_json::Value::String(p.to_string()),
        }),
        tls: termination.map(|termination| RouteTls {
            termination,
            insecure_edge_termination_policy: None,
        }),
        ..RouteSpec::default()
    };
    Resource::new(cluster, Route::new(name, spec))
}

impl Resource<Route> {
    pub async fn hostname(&self) -> Option<String> {
        self.read(Route::hostname).await
    }

    pub async fn url(&self) -> Option<String> {
        self.read(Route::url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_follows_tls_and_admitted_host() {
        let mut route = Route::new(
            "keycloak",
            RouteSpec {
                host: Some("requested.example.com".to_string()),
                tls: Some(RouteTls {
                    termination: Termination::Edge,
                    insecure_edge_termination_policy: None,
                }),
                ..RouteSpec::default()
            },
        );
        assert_eq!(route.url().as_deref(), Some("https://requested.example.com"));

        route.status = Some(RouteStatus {
            ingress: vec![RouteIngress {
                host: Some("keycloak-tools.apps.example.com".to_string()),
                ..RouteIngress::default()
            }],
        });
        assert_eq!(
            route.url().as_deref(),
            Some("https://keycloak-tools.apps.example.com")
        );
    }

    #[test]
    fn serializes_termination_lowercase() {
        let value = serde_json::to_value(RouteTls {
            termination: Termination::Passthrough,
            insecure_edge_termination_policy: None,
        })
        .unwrap();
        assert_eq!(value["termination"], "passthrough");
    }
}
