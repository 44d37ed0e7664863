//! PlanPolicy (extensions.kuadrant.io/v1alpha1): request quotas per tier.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rate_limit::{target_ref, Limit};
use super::{policy_object, PolicyStatus, TargetRef};
use crate::errors::{Error, Result};
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::Resource;

/// Calendar quotas plus arbitrary windows
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlanLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yearly: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<Limit>,
}

impl PlanLimits {
    pub fn daily(daily: u64) -> Self {
        Self {
            daily: Some(daily),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Tier selected by a CEL `predicate` over the request
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub tier: String,
    pub predicate: String,
    pub limits: PlanLimits,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "extensions.kuadrant.io",
    version = "v1alpha1",
    kind = "PlanPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PlanPolicySpec {
    pub target_ref: TargetRef,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

policy_object!(PlanPolicy);

pub fn plan_policy(
    cluster: &ClusterClient,
    name: &str,
    target: &dyn Referencable,
    section_name: Option<&str>,
    labels: BTreeMap<String, String>,
) -> Resource<PlanPolicy> {
    let mut object = PlanPolicy::new(
        name,
        PlanPolicySpec {
            target_ref: target_ref(target, section_name),
            plans: Vec::new(),
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

impl Resource<PlanPolicy> {
    /// Add tier `tier`; a tier already present is replaced
    pub async fn add_plan(&self, tier: &str, predicate: &str, limits: PlanLimits) -> Result<()> {
        if limits.is_empty() {
            return Err(Error::config(format!("plan {} has no limits", tier)));
        }
        let plan = Plan {
            tier: tier.to_string(),
            predicate: predicate.to_string(),
            limits,
        };
        self.modify(|p| {
            p.spec.plans.retain(|existing| existing.tier != plan.tier);
            p.spec.plans.push(plan.clone());
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Reference;
    use crate::kubernetes::offline_cluster;
    use serde_json::json;
    use std::time::Duration;

    struct Route;

    impl Referencable for Route {
        fn reference(&self) -> Reference {
            Reference::http_route("route", "kuadrant")
        }
    }

    #[tokio::test]
    async fn tiers_are_unique() {
        let policy = plan_policy(&offline_cluster(), "plans", &Route, None, BTreeMap::new());
        let gold = r#"has(auth.identity) && auth.identity.metadata.annotations["secret.kuadrant.io/plan-id"] == "gold""#;
        policy.add_plan("gold", gold, PlanLimits::daily(100)).await.unwrap();
        policy
            .add_plan(
                "gold",
                gold,
                PlanLimits {
                    custom: vec![Limit::new(5, Duration::from_secs(60))],
                    ..PlanLimits::daily(200)
                },
            )
            .await
            .unwrap();
        policy.add_plan("bronze", "true", PlanLimits::daily(10)).await.unwrap();

        let spec = policy.to_value().await.unwrap()["spec"].clone();
        let plans = spec["plans"].as_array().unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0]["tier"], "gold");
        assert_eq!(plans[0]["limits"], json!({"daily": 200, "custom": [{"limit": 5, "window": "1m"}]}));
        assert!(policy.add_plan("empty", "true", PlanLimits::default()).await.is_err());
    }
}
