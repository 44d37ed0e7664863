//! Chaos Mesh PodChaos (chaos-mesh.org/v1alpha1) for disruptive scenarios.
//!
//! Two construction modes exist: [`pod_chaos`] composes an uncommitted object
//! that the caller commits explicitly, [`pod_chaos_committed`] composes and
//! commits in one step.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::conditions::{Condition, ConditionMatcher, HasConditions};
use crate::kubernetes::resource::{Readiness, Resource};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChaosAction {
    PodKill,
    PodFailure,
    ContainerKill,
}

/// Which of the selected pods are affected
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChaosMode {
    One,
    All,
    Fixed,
    FixedPercent,
    RandomMaxPercent,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChaosSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub label_selectors: BTreeMap<String, String>,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize)]
#[kube(
    group = "chaos-mesh.org",
    version = "v1alpha1",
    kind = "PodChaos",
    namespaced,
    status = "PodChaosStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PodChaosSpec {
    pub action: ChaosAction,
    pub mode: ChaosMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub selector: ChaosSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<i64>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodChaosStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HasConditions for PodChaos {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

impl Readiness for PodChaos {
    fn is_ready(&self) -> bool {
        self.has_condition(&ConditionMatcher::is_true("AllInjected"))
    }
}

/// Parameters of one chaos experiment
#[derive(Clone, Debug)]
pub struct PodChaosRequest {
    pub action: ChaosAction,
    pub mode: ChaosMode,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub duration: Option<String>,
    pub container_names: Vec<String>,
}

impl PodChaosRequest {
    pub fn new(action: ChaosAction, namespace: impl Into<String>) -> Self {
        Self {
            action,
            mode: ChaosMode::One,
            namespace: namespace.into(),
            labels: BTreeMap::new(),
            duration: None,
            container_names: Vec::new(),
        }
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn mode(mut self, mode: ChaosMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container_names.push(container.into());
        self
    }
}

/// Compose an uncommitted PodChaos; commit it explicitly
pub fn pod_chaos(cluster: &ClusterClient, name: &str, request: PodChaosRequest) -> Resource<PodChaos> {
    let spec = PodChaosSpec {
        action: request.action,
        mode: request.mode,
        value: None,
        selector: ChaosSelector {
            namespaces: vec![request.namespace],
            label_selectors: request.labels,
        },
        duration: request.duration,
        container_names: request.container_names,
        grace_period: None,
    };
    Resource::new(cluster, PodChaos::new(name, spec))
}

/// Compose and commit in one step
pub async fn pod_chaos_committed(
    cluster: &ClusterClient,
    name: &str,
    request: PodChaosRequest,
) -> Result<Resource<PodChaos>> {
    let chaos = pod_chaos(cluster, name, request);
    chaos.commit().await?;
    Ok(chaos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::offline_cluster;

    #[tokio::test]
    async fn composes_without_committing() {
        let chaos = pod_chaos(
            &offline_cluster(),
            "kill-authorino",
            PodChaosRequest::new(ChaosAction::PodKill, "kuadrant-system")
                .label("app", "authorino")
                .duration("30s"),
        );
        assert!(!chaos.is_committed());
        let value = chaos.to_value().await.unwrap();
        assert_eq!(value["spec"]["action"], "pod-kill");
        assert_eq!(value["spec"]["mode"], "one");
        assert_eq!(value["spec"]["selector"]["namespaces"][0], "kuadrant-system");
        assert_eq!(value["spec"]["selector"]["labelSelectors"]["app"], "authorino");
    }

    #[test]
    fn ready_once_all_injected() {
        let mut chaos = PodChaos::new(
            "c",
            PodChaosSpec {
                action: ChaosAction::ContainerKill,
                mode: ChaosMode::All,
                value: None,
                selector: ChaosSelector::default(),
                duration: None,
                container_names: vec!["limitador".to_string()],
                grace_period: None,
            },
        );
        assert!(!chaos.is_ready());
        chaos.status = Some(PodChaosStatus {
            conditions: vec![Condition {
                type_: "AllInjected".to_string(),
                status: "True".to_string(),
                ..Condition::default()
            }],
        });
        assert!(chaos.is_ready());
    }
}
