//! Operator-managed Gateway API gateway (gateway.networking.k8s.io/v1).

use async_trait::async_trait;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::http_route::affected_by;
use super::{Reference, Referencable};
use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::conditions::{Condition, ConditionMatcher, HasConditions};
use crate::kubernetes::resource::{Lifecycle, Readiness, Resource};
use crate::utils::certificates::TlsMaterial;
use crate::utils::timeout::Wait;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "Gateway",
    namespaced,
    status = "GatewayStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    pub gateway_class_name: String,
    pub listeners: Vec<Listener>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub port: u16,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<ListenerTls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_routes: Option<AllowedRoutes>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerTls {
    pub mode: String,
    #[serde(default)]
    pub certificate_refs: Vec<CertificateRef>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllowedRoutes {
    pub namespaces: RouteNamespaces,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteNamespaces {
    pub from: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub addresses: Vec<GatewayAddress>,
    #[serde(default)]
    pub listeners: Vec<ListenerStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAddress {
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerStatus {
    pub name: String,
    #[serde(default)]
    pub attached_routes: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HasConditions for Gateway {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

impl Readiness for Gateway {
    fn is_ready(&self) -> bool {
        self.has_condition(&ConditionMatcher::is_true("Programmed"))
    }
}

/// Gateway reconciled by the installed gateway controller
#[derive(Debug)]
pub struct KuadrantGateway {
    resource: Resource<Gateway>,
    gateway_class: String,
    tls_secret: Option<String>,
}

impl KuadrantGateway {
    /// Uncommitted gateway with one listener on `hostname`: HTTP on 80, or
    /// HTTPS on 443 terminating with secret `<name>-tls` when `tls` is set
    pub fn new(
        cluster: &ClusterClient,
        name: &str,
        gateway_class: &str,
        hostname: &str,
        tls: bool,
        labels: BTreeMap<String, String>,
    ) -> Self {
        let allowed_routes = Some(AllowedRoutes {
            namespaces: RouteNamespaces {
                from: "All".to_string(),
            },
        });
        let tls_secret = tls.then(|| format!("{}-tls", name));

        let listener = match &tls_secret {
            Some(secret) => Listener {
                name: "api".to_string(),
                hostname: Some(hostname.to_string()),
                port: 443,
                protocol: "HTTPS".to_string(),
                tls: Some(ListenerTls {
                    mode: "Terminate".to_string(),
                    certificate_refs: vec![CertificateRef {
                        kind: Some("Secret".to_string()),
                        name: secret.clone(),
                    }],
                }),
                allowed_routes,
            },
            None => Listener {
                name: "api".to_string(),
                hostname: Some(hostname.to_string()),
                port: 80,
                protocol: "HTTP".to_string(),
                tls: None,
                allowed_routes,
            },
        };

        let mut object = Gateway::new(
            name,
            GatewaySpec {
                gateway_class_name: gateway_class.to_string(),
                listeners: vec![listener],
            },
        );
        object.metadata.labels = Some(labels);

        Self {
            resource: Resource::new(cluster, object).with_ready_wait(Wait::secs(300)),
            gateway_class: gateway_class.to_string(),
            tls_secret,
        }
    }

    /// Wrap a gateway that already exists on the cluster
    pub async fn existing(cluster: &ClusterClient, name: &str) -> Result<Self> {
        let resource: Resource<Gateway> = cluster.fetch(name).await?;
        let (gateway_class, tls_secret) = resource
            .read(|g| {
                let secret = g
                    .spec
                    .listeners
                    .iter()
                    .filter_map(|l| l.tls.as_ref())
                    .flat_map(|t| t.certificate_refs.iter())
                    .map(|c| c.name.clone())
                    .next();
                (g.spec.gateway_class_name.clone(), secret)
            })
            .await;
        Ok(Self {
            resource,
            gateway_class,
            tls_secret,
        })
    }

    pub fn resource(&self) -> &Resource<Gateway> {
        &self.resource
    }

    pub fn gateway_class(&self) -> &str {
        &self.gateway_class
    }

    /// Whether the gateway itself reports being affected by a policy
    pub async fn is_affected_by(&self, kind: &str, policy: &Reference) -> bool {
        if let Err(e) = self.resource.refresh().await {
            debug!(error = %e, "Refresh before affected-by check failed");
        }
        self.resource
            .read(|g| affected_by(g.conditions(), kind, policy))
            .await
    }

    /// Routes attached to a listener, as reported in status
    pub async fn attached_routes(&self, listener: &str) -> Option<i32> {
        self.resource
            .read(|g| {
                g.status
                    .as_ref()?
                    .listeners
                    .iter()
                    .find(|l| l.name == listener)
                    .map(|l| l.attached_routes)
            })
            .await
    }
}

impl Referencable for KuadrantGateway {
    fn reference(&self) -> Reference {
        Reference::gateway(self.resource.name(), self.resource.namespace())
    }
}

#[async_trait]
impl Lifecycle for KuadrantGateway {
    fn describe(&self) -> String {
        self.resource.describe()
    }

    async fn commit(&self) -> Result<()> {
        self.resource.commit().await
    }

    async fn delete(&self) -> Result<()> {
        self.resource.delete().await
    }

    async fn wait_for_ready(&self) -> bool {
        Lifecycle::wait_for_ready(&self.resource).await
    }
}

#[async_trait]
impl super::Gateway for KuadrantGateway {
    fn name(&self) -> &str {
        self.resource.name()
    }

    fn namespace(&self) -> &str {
        self.resource.namespace()
    }

    /// Controllers name the data-plane Service `<gateway>-<class>`
    fn service_name(&self) -> String {
        format!("{}-{}", self.resource.name(), self.gateway_class)
    }

    async fn external_ip(&self) -> Result<String> {
        self.resource.refresh().await?;
        self.resource
            .read(|g| {
                g.status
                    .as_ref()
                    .and_then(|s| s.addresses.first())
                    .map(|a| a.value.clone())
            })
            .await
            .ok_or_else(|| {
                Error::control_plane(format!("gateway {} has no address yet", self.resource.name()))
            })
    }

    async fn get_tls_cert(&self, _hostname: &str) -> Result<Option<TlsMaterial>> {
        let Some(secret_name) = &self.tls_secret else {
            return Ok(None);
        };
        match self.resource.cluster().get_secret(secret_name).await {
            Ok(secret) => secret.tls_material().await,
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Gateway as _;
    use crate::kubernetes::offline_cluster;

    #[tokio::test]
    async fn tls_gateway_terminates_with_named_secret() {
        let gateway = KuadrantGateway::new(
            &offline_cluster(),
            "gw-x1y2z",
            "istio",
            "*.apps.example.com",
            true,
            BTreeMap::new(),
        );
        let value = gateway.resource().to_value().await.unwrap();
        let listener = &value["spec"]["listeners"][0];
        assert_eq!(listener["protocol"], "HTTPS");
        assert_eq!(listener["port"], 443);
        assert_eq!(listener["tls"]["certificateRefs"][0]["name"], "gw-x1y2z-tls");
        assert_eq!(listener["allowedRoutes"]["namespaces"]["from"], "All");
        assert_eq!(gateway.reference(), Reference::gateway("gw-x1y2z", "kuadrant"));
        assert_eq!(gateway.service_name(), "gw-x1y2z-istio");
    }

    #[test]
    fn programmed_condition_means_ready() {
        let mut gateway = Gateway::new("gw", GatewaySpec::default());
        assert!(!gateway.is_ready());
        gateway.status = Some(GatewayStatus {
            conditions: vec![Condition {
                type_: "Programmed".to_string(),
                status: "True".to_string(),
                ..Condition::default()
            }],
            ..GatewayStatus::default()
        });
        assert!(gateway.is_ready());
    }
}
