//! TelemetryPolicy (extensions.kuadrant.io/v1alpha1): extra labels on the
//! gateway's request metrics, each a CEL expression.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{policy_object, PolicyStatus, TargetRef};
use crate::errors::{Error, Result};
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::Resource;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct MetricLabels {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Metrics {
    #[serde(default)]
    pub default: MetricLabels,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "extensions.kuadrant.io",
    version = "v1alpha1",
    kind = "TelemetryPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPolicySpec {
    pub target_ref: TargetRef,
    #[serde(default)]
    pub metrics: Metrics,
}

policy_object!(TelemetryPolicy);

/// Uncommitted TelemetryPolicy; it only attaches to Gateways
pub fn telemetry_policy(
    cluster: &ClusterClient,
    name: &str,
    gateway: &dyn Referencable,
    labels: BTreeMap<String, String>,
) -> Resource<TelemetryPolicy> {
    let mut object = TelemetryPolicy::new(
        name,
        TelemetryPolicySpec {
            target_ref: TargetRef::to(gateway),
            metrics: Metrics::default(),
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

impl Resource<TelemetryPolicy> {
    /// Metric label `name` valued by CEL `expression`, e.g. `auth.identity.userid`
    pub async fn add_label(&self, name: &str, expression: &str) -> Result<()> {
        if name.is_empty() || expression.is_empty() {
            return Err(Error::config("telemetry label needs a name and an expression"));
        }
        self.modify(|p| {
            p.spec
                .metrics
                .default
                .labels
                .insert(name.to_string(), expression.to_string());
        })
        .await
    }
}
