//! Deployment builder, readiness, and rollouts.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DeleteParams, ListParams, ObjectMeta};
use std::collections::BTreeMap;
use tracing::info;

use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Lifecycle, Readiness, Resource};

/// Annotation bumped by a soft rollout
pub const RESTARTED_AT_ANNOTATION: &str = "kubectl.kubernetes.io/restartedAt";

impl Readiness for Deployment {
    fn is_ready(&self) -> bool {
        let desired = self.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let ready = self.status.as_ref().and_then(|s| s.ready_replicas);
        match ready {
            Some(ready) => ready >= desired,
            None => false,
        }
    }
}

/// Source of a mounted volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeSource {
    ConfigMap(String),
    Secret(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub name: String,
    pub source: VolumeSource,
    pub mount_path: String,
}

/// How to restart a deployment's pods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollout {
    /// Bump the pod template annotation and let the controller roll
    Soft,
    /// Delete the pods outright
    Hard,
}

/// Typed builder for a single-container deployment
#[derive(Debug, Clone)]
pub struct DeploymentBuilder {
    name: String,
    image: String,
    labels: BTreeMap<String, String>,
    replicas: i32,
    ports: Vec<(String, i32)>,
    env: Vec<(String, String)>,
    command: Option<Vec<String>>,
    args: Vec<String>,
    mounts: Vec<Mount>,
    readiness_path: Option<(String, i32)>,
    service_account: Option<String>,
}

impl DeploymentBuilder {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        let name = name.into();
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), name.clone());
        Self {
            name,
            image: image.into(),
            labels,
            replicas: 1,
            ports: vec![],
            env: vec![],
            command: None,
            args: vec![],
            mounts: vec![],
            readiness_path: None,
            service_account: None,
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn replicas(mut self, replicas: i32) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn port(mut self, name: impl Into<String>, port: i32) -> Self {
        self.ports.push((name.into(), port));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn command<I: IntoIterator<Item = S>, S: Into<String>>(mut self, command: I) -> Self {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    pub fn args<I: IntoIterator<Item = S>, S: Into<String>>(mut self, args: I) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn readiness_probe(mut self, path: impl Into<String>, port: i32) -> Self {
        self.readiness_path = Some((path.into(), port));
        self
    }

    pub fn service_account(mut self, name: impl Into<String>) -> Self {
        self.service_account = Some(name.into());
        self
    }

    /// Selector labels of the pods
    pub fn selector(&self) -> BTreeMap<String, String> {
        let mut selector = BTreeMap::new();
        selector.insert("app".to_string(), self.name.clone());
        selector
    }

    fn container(&self) -> Container {
        Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            command: self.command.clone(),
            args: (!self.args.is_empty()).then(|| self.args.clone()),
            ports: Some(
                self.ports
                    .iter()
                    .map(|(name, port)| ContainerPort {
                        name: Some(name.clone()),
                        container_port: *port,
                        ..ContainerPort::default()
                    })
                    .collect(),
            ),
            env: Some(
                self.env
                    .iter()
                    .map(|(name, value)| EnvVar {
                        name: name.clone(),
                        value: Some(value.clone()),
                        ..EnvVar::default()
                    })
                    .collect(),
            ),
            volume_mounts: Some(
                self.mounts
                    .iter()
                    .map(|m| VolumeMount {
                        name: m.name.clone(),
                        mount_path: m.mount_path.clone(),
                        ..VolumeMount::default()
                    })
                    .collect(),
            ),
            readiness_probe: self.readiness_path.as_ref().map(|(path, port)| Probe {
                http_get: Some(HTTPGetAction {
                    path: Some(path.clone()),
                    port: IntOrString::Int(*port),
                    ..HTTPGetAction::default()
                }),
                initial_delay_seconds: Some(1),
                period_seconds: Some(2),
                ..Probe::default()
            }),
            ..Container::default()
        }
    }

    fn volumes(&self) -> Vec<Volume> {
        self.mounts
            .iter()
            .map(|m| match &m.source {
                VolumeSource::ConfigMap(name) => Volume {
                    name: m.name.clone(),
                    config_map: Some(ConfigMapVolumeSource {
                        name: name.clone(),
                        ..ConfigMapVolumeSource::default()
                    }),
                    ..Volume::default()
                },
                VolumeSource::Secret(name) => Volume {
                    name: m.name.clone(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(name.clone()),
                        ..SecretVolumeSource::default()
                    }),
                    ..Volume::default()
                },
            })
            .collect()
    }

    /// Build the object
    pub fn object(&self) -> Deployment {
        let mut pod_labels = self.labels.clone();
        pod_labels.extend(self.selector());
        Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(self.labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.selector()),
                    ..LabelSelector::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(pod_labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![self.container()],
                        volumes: Some(self.volumes()),
                        service_account_name: self.service_account.clone(),
                        ..PodSpec::default()
                    }),
                },
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        }
    }

    /// Uncommitted wrapper
    pub fn build(&self, cluster: &ClusterClient) -> Resource<Deployment> {
        Resource::new(cluster, self.object())
    }
}

impl Resource<Deployment> {
    /// `matchLabels` of the deployment, as a label selector string
    pub async fn selector_string(&self) -> Option<String> {
        self.read(|d| {
            let labels = d.spec.as_ref()?.selector.match_labels.as_ref()?;
            Some(
                labels
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect::<Vec<_>>()
                    .join(","),
            )
        })
        .await
    }

    /// Restart the pods and wait for readiness again
    pub async fn rollout(&self, kind: Rollout) -> Result<bool> {
        info!(deployment = %self.name(), ?kind, "Rolling out");
        match kind {
            Rollout::Soft => {
                let now = chrono::Utc::now().to_rfc3339();
                self.modify(|d| {
                    if let Some(spec) = d.spec.as_mut() {
                        spec.template
                            .metadata
                            .get_or_insert_with(ObjectMeta::default)
                            .annotations
                            .get_or_insert_with(BTreeMap::new)
                            .insert(RESTARTED_AT_ANNOTATION.to_string(), now.clone());
                    }
                })
                .await?;
            }
            Rollout::Hard => {
                let selector = self.selector_string().await.ok_or_else(|| {
                    Error::control_plane(format!("deployment {} has no selector", self.name()))
                })?;
                let pods: kube::Api<k8s_openapi::api::core::v1::Pod> = self.cluster().api();
                pods.delete_collection(&DeleteParams::default(), &ListParams::default().labels(&selector))
                    .await
                    .map_err(|e| Error::kube(format!("delete pods {}", selector), e))?;
            }
        }
        // Give the controller a moment to observe the new generation
        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        Ok(Lifecycle::wait_for_ready(self).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    #[test]
    fn builder_wires_selector_ports_and_mounts() {
        let deployment = DeploymentBuilder::new("envoy", "envoyproxy/envoy:v1.31")
            .port("api", 8000)
            .mount(Mount {
                name: "config".to_string(),
                source: VolumeSource::ConfigMap("envoy-config".to_string()),
                mount_path: "/etc/envoy".to_string(),
            })
            .object();

        let spec = deployment.spec.unwrap();
        assert_eq!(
            spec.selector.match_labels.unwrap().get("app").map(String::as_str),
            Some("envoy")
        );
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.containers[0].ports.as_ref().unwrap()[0].container_port, 8000);
        assert_eq!(
            pod.volumes.unwrap()[0].config_map.as_ref().unwrap().name,
            "envoy-config"
        );
    }

    #[test]
    fn ready_replicas_must_reach_desired() {
        let mut deployment = DeploymentBuilder::new("httpbin", "httpbin").replicas(2).object();
        assert!(!deployment.is_ready());
        deployment.status = Some(DeploymentStatus {
            ready_replicas: Some(1),
            ..DeploymentStatus::default()
        });
        assert!(!deployment.is_ready());
        deployment.status.as_mut().unwrap().ready_replicas = Some(2);
        assert!(deployment.is_ready());
    }
}
