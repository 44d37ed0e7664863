//! Envoy deployment calling the authorization service directly.
//!
//! Used where the authorization service is tested standalone, without the
//! Gateway API controllers: a ConfigMap carries the bootstrap document, a
//! Deployment mounts it, and a Service exposes the listener.

pub mod bootstrap;
pub mod route;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Reference, Referencable};
use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::config_map::config_map;
use crate::kubernetes::objects::deployment::{DeploymentBuilder, Mount, Rollout, VolumeSource};
use crate::kubernetes::objects::secret::tls_secret;
use crate::kubernetes::objects::service::{service, ServicePort, ServiceType};
use crate::kubernetes::resource::{Lifecycle, Resource};
use crate::utils::certificates::TlsMaterial;

pub use bootstrap::{EnvoyBootstrap, JwtProvider};
pub use route::EnvoyVirtualRoute;

/// ConfigMap key holding the bootstrap document
pub const CONFIG_KEY: &str = "envoy.yaml";
const CONFIG_DIR: &str = "/usr/local/etc/envoy";

/// Deployment-level knobs
#[derive(Debug, Clone)]
pub struct EnvoyOptions {
    pub image: String,
    pub service_type: ServiceType,
    pub labels: BTreeMap<String, String>,
    pub slow_loadbalancer_delay: Option<Duration>,
}

impl EnvoyOptions {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            service_type: ServiceType::ClusterIp,
            labels: BTreeMap::new(),
            slow_loadbalancer_delay: None,
        }
    }

    pub fn service_type(mut self, service_type: ServiceType) -> Self {
        self.service_type = service_type;
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Certificates for the TLS variant
#[derive(Debug, Clone)]
pub struct EnvoyTls {
    /// Served to clients
    pub server: TlsMaterial,
    /// CA client certificates must chain to
    pub client_ca: TlsMaterial,
    /// CA of the authorization service's gRPC certificate
    pub authorizer_ca: TlsMaterial,
}

/// Envoy gateway: bootstrap ConfigMap, Deployment, Service, optional TLS secrets
pub struct EnvoyGateway {
    name: String,
    namespace: String,
    bootstrap: Mutex<EnvoyBootstrap>,
    config: Resource<ConfigMap>,
    deployment: Resource<Deployment>,
    service: Resource<Service>,
    secrets: Vec<Resource<Secret>>,
    server_cert: Option<TlsMaterial>,
}

impl std::fmt::Debug for EnvoyGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvoyGateway")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("tls", &self.server_cert.is_some())
            .finish()
    }
}

impl EnvoyGateway {
    pub fn new(
        cluster: &ClusterClient,
        name: &str,
        options: EnvoyOptions,
        mut bootstrap: EnvoyBootstrap,
        tls: Option<EnvoyTls>,
    ) -> Result<Self> {
        if tls.is_some() && !bootstrap.is_tls() {
            bootstrap = bootstrap.with_tls();
        }

        let mut data = BTreeMap::new();
        data.insert(CONFIG_KEY.to_string(), bootstrap.to_yaml()?);
        let config = config_map(cluster, name, data, options.labels.clone());

        let config_path = format!("{}/{}", CONFIG_DIR, CONFIG_KEY);
        let mut builder = DeploymentBuilder::new(name, &options.image)
            .port("api", bootstrap::LISTENER_PORT)
            .port("admin", bootstrap::ADMIN_PORT)
            .command(["/usr/local/bin/envoy"])
            .args([
                "--config-path",
                config_path.as_str(),
                "--log-level",
                "info",
                "--component-log-level",
                "filter:trace,http:debug,router:debug",
            ])
            .readiness_probe("/ready", bootstrap::ADMIN_PORT)
            .mount(Mount {
                name: "config".to_string(),
                source: VolumeSource::ConfigMap(name.to_string()),
                mount_path: CONFIG_DIR.to_string(),
            });
        for (key, value) in &options.labels {
            builder = builder.label(key, value);
        }

        let mut secrets = Vec::new();
        let server_cert = tls.as_ref().map(|t| t.server.clone());
        if let Some(tls) = &tls {
            let mounts = [
                (format!("{}-cert", name), &tls.server, bootstrap::ENVOY_CERT_PATH),
                (format!("{}-envoy-ca", name), &tls.client_ca, bootstrap::ENVOY_CA_PATH),
                (format!("{}-authorino-ca", name), &tls.authorizer_ca, bootstrap::AUTHORIZER_CA_PATH),
            ];
            for (secret_name, material, path) in mounts {
                secrets.push(tls_secret(cluster, &secret_name, material));
                builder = builder.mount(Mount {
                    name: secret_name.clone(),
                    source: VolumeSource::Secret(secret_name),
                    mount_path: path.to_string(),
                });
            }
        }

        let exposed_port = if server_cert.is_some() { 443 } else { 80 };
        let service = service(
            cluster,
            name,
            builder.selector(),
            &[ServicePort::new("api", exposed_port, bootstrap::LISTENER_PORT)],
            options.service_type,
            options.labels.clone(),
            options.slow_loadbalancer_delay,
        );
        let deployment = builder.build(cluster);

        Ok(Self {
            name: name.to_string(),
            namespace: deployment.namespace().to_string(),
            bootstrap: Mutex::new(bootstrap),
            config,
            deployment,
            service,
            secrets,
            server_cert,
        })
    }

    pub fn config(&self) -> &Resource<ConfigMap> {
        &self.config
    }

    pub fn deployment(&self) -> &Resource<Deployment> {
        &self.deployment
    }

    pub fn service(&self) -> &Resource<Service> {
        &self.service
    }

    /// Current bootstrap model
    pub async fn bootstrap(&self) -> EnvoyBootstrap {
        self.bootstrap.lock().await.clone()
    }

    /// Edit the bootstrap, store it, and restart Envoy if it is running
    pub async fn update_bootstrap<F>(&self, edit: F) -> Result<()>
    where
        F: FnOnce(&mut EnvoyBootstrap) + Send,
    {
        let mut bootstrap = self.bootstrap.lock().await;
        edit(&mut bootstrap);
        let rendered = bootstrap.to_yaml()?;
        self.config.set(CONFIG_KEY, &rendered).await?;

        if self.deployment.is_committed() {
            info!(gateway = %self.name, "Bootstrap changed, restarting envoy");
            if !self.deployment.rollout(Rollout::Soft).await? {
                warn!(gateway = %self.name, "Envoy did not become ready after restart");
            }
        }
        Ok(())
    }
}

impl Referencable for EnvoyGateway {
    fn reference(&self) -> Reference {
        Reference::service(&self.name, &self.namespace)
    }
}

#[async_trait]
impl Lifecycle for EnvoyGateway {
    fn describe(&self) -> String {
        format!("EnvoyGateway/{}/{}", self.namespace, self.name)
    }

    async fn commit(&self) -> Result<()> {
        for secret in &self.secrets {
            secret.commit().await?;
        }
        self.config.commit().await?;
        self.deployment.commit().await?;
        self.service.commit().await
    }

    async fn delete(&self) -> Result<()> {
        let mut first_error = None;
        let mut results = vec![
            Lifecycle::delete(&self.service).await,
            Lifecycle::delete(&self.deployment).await,
            Lifecycle::delete(&self.config).await,
        ];
        for secret in self.secrets.iter().rev() {
            results.push(Lifecycle::delete(secret).await);
        }
        for result in results {
            if let Err(e) = result {
                warn!(gateway = %self.name, error = %e, "Envoy cleanup step failed");
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

#[async_trait]
impl super::Gateway for EnvoyGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn service_name(&self) -> String {
        self.name.clone()
    }

    async fn external_ip(&self) -> Result<String> {
        self.service.refresh().await?;
        match self.service.external_ip().await {
            Some(ip) => Ok(ip),
            None => Err(Error::control_plane(format!(
                "envoy service {} has no external address",
                self.name
            ))),
        }
    }

    async fn get_tls_cert(&self, _hostname: &str) -> Result<Option<TlsMaterial>> {
        Ok(self.server_cert.clone())
    }
}
