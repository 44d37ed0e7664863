//! RateLimitPolicy (kuadrant.io/v1) and the limits model it shares with
//! TokenRateLimitPolicy.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{policy_object, Block, Expression, PolicyStatus, Predicate, Strategy, TargetRef};
use crate::errors::{Error, Result};
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{KubeObject, Resource};

/// `limit` hits per `window`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Limit {
    pub limit: u64,
    pub window: String,
}

impl Limit {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self {
            limit,
            window: format_window(window),
        }
    }

    /// Window as a duration; `None` for windows this harness cannot parse
    pub fn window(&self) -> Option<Duration> {
        parse_window(&self.window)
    }
}

/// Largest whole unit: `1h`, `2m`, `10s`, `500ms`
pub fn format_window(window: Duration) -> String {
    let millis = window.as_millis();
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = window.as_secs();
    if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

pub fn parse_window(window: &str) -> Option<Duration> {
    let split = window.find(|c: char| !c.is_ascii_digit())?;
    let (number, unit) = window.split_at(split);
    let number: u64 = number.parse().ok()?;
    match unit {
        "ms" => Some(Duration::from_millis(number)),
        "s" => Some(Duration::from_secs(number)),
        "m" => Some(Duration::from_secs(number * 60)),
        "h" => Some(Duration::from_secs(number * 3600)),
        _ => None,
    }
}

/// One named limit: rates, counter qualifiers, and conditions
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimitDefinition {
    pub rates: Vec<Limit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counters: Vec<Expression>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Predicate>,
}

/// `defaults` / `overrides` block
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LimitBlock {
    #[serde(default)]
    pub limits: BTreeMap<String, LimitDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
}

/// Policies made of named limits
pub trait LimitHost: KubeObject {
    /// Limits of `block`, creating a defaults/overrides block on demand
    fn limits_mut(&mut self, block: Block) -> &mut BTreeMap<String, LimitDefinition>;

    /// Limits of the top level and of every existing block
    fn all_limits_mut(&mut self) -> Vec<&mut BTreeMap<String, LimitDefinition>>;

    fn when_mut(&mut self, block: Block) -> &mut Vec<Predicate>;

    /// Block settings; `None` for the top level
    fn block_mut(&mut self, block: Block) -> Option<&mut LimitBlock>;
}

macro_rules! limit_host {
    ($kind:ty) => {
        impl $crate::policy::rate_limit::LimitHost for $kind {
            fn limits_mut(
                &mut self,
                block: $crate::policy::Block,
            ) -> &mut std::collections::BTreeMap<String, $crate::policy::rate_limit::LimitDefinition> {
                match block {
                    $crate::policy::Block::Root => &mut self.spec.limits,
                    $crate::policy::Block::Defaults => {
                        &mut self.spec.defaults.get_or_insert_with(Default::default).limits
                    }
                    $crate::policy::Block::Overrides => {
                        &mut self.spec.overrides.get_or_insert_with(Default::default).limits
                    }
                }
            }

            fn all_limits_mut(
                &mut self,
            ) -> Vec<&mut std::collections::BTreeMap<String, $crate::policy::rate_limit::LimitDefinition>> {
                let spec = &mut self.spec;
                let mut all = vec![&mut spec.limits];
                all.extend(spec.defaults.as_mut().map(|b| &mut b.limits));
                all.extend(spec.overrides.as_mut().map(|b| &mut b.limits));
                all
            }

            fn when_mut(&mut self, block: $crate::policy::Block) -> &mut Vec<$crate::policy::Predicate> {
                match block {
                    $crate::policy::Block::Root => &mut self.spec.when,
                    $crate::policy::Block::Defaults => {
                        &mut self.spec.defaults.get_or_insert_with(Default::default).when
                    }
                    $crate::policy::Block::Overrides => {
                        &mut self.spec.overrides.get_or_insert_with(Default::default).when
                    }
                }
            }

            fn block_mut(
                &mut self,
                block: $crate::policy::Block,
            ) -> Option<&mut $crate::policy::rate_limit::LimitBlock> {
                match block {
                    $crate::policy::Block::Root => None,
                    $crate::policy::Block::Defaults => Some(self.spec.defaults.get_or_insert_with(Default::default)),
                    $crate::policy::Block::Overrides => Some(self.spec.overrides.get_or_insert_with(Default::default)),
                }
            }
        }
    };
}
pub(crate) use limit_host;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "kuadrant.io",
    version = "v1",
    kind = "RateLimitPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicySpec {
    pub target_ref: TargetRef,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, LimitDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<LimitBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<LimitBlock>,
}

policy_object!(RateLimitPolicy);
limit_host!(RateLimitPolicy);

pub(crate) fn target_ref(target: &dyn Referencable, section_name: Option<&str>) -> TargetRef {
    match section_name {
        Some(section) => TargetRef::section(target, section),
        None => TargetRef::to(target),
    }
}

/// Uncommitted RateLimitPolicy attached to `target`
pub fn rate_limit_policy(
    cluster: &ClusterClient,
    name: &str,
    target: &dyn Referencable,
    section_name: Option<&str>,
    labels: BTreeMap<String, String>,
) -> Resource<RateLimitPolicy> {
    let mut object = RateLimitPolicy::new(
        name,
        RateLimitPolicySpec {
            target_ref: target_ref(target, section_name),
            ..RateLimitPolicySpec::default()
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

impl<K: LimitHost> Resource<K> {
    /// Top-level limit `name`
    pub async fn add_limit(
        &self,
        name: &str,
        limits: Vec<Limit>,
        counters: Vec<Expression>,
        when: Vec<Predicate>,
    ) -> Result<()> {
        self.add_limit_to(Block::Root, name, limits, counters, when).await
    }

    pub async fn add_limit_to(
        &self,
        block: Block,
        name: &str,
        limits: Vec<Limit>,
        counters: Vec<Expression>,
        when: Vec<Predicate>,
    ) -> Result<()> {
        if limits.is_empty() {
            return Err(Error::config(format!("limit {} needs at least one rate", name)));
        }
        let definition = LimitDefinition {
            rates: limits,
            counters,
            when,
        };
        self.modify(|p| {
            p.limits_mut(block).insert(name.to_string(), definition.clone());
        })
        .await
    }

    pub async fn remove_limit(&self, name: &str) -> Result<()> {
        self.modify(|p| {
            for limits in p.all_limits_mut() {
                limits.remove(name);
            }
        })
        .await
    }

    /// Condition on the whole policy or on a defaults/overrides block
    pub async fn add_predicate(&self, block: Block, predicate: Predicate) -> Result<()> {
        self.modify(|p| p.when_mut(block).push(predicate.clone())).await
    }

    pub async fn set_strategy(&self, block: Block, strategy: Strategy) -> Result<()> {
        self.modify(|p| {
            if let Some(b) = p.block_mut(block) {
                b.strategy = Some(strategy);
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Reference;
    use crate::kubernetes::offline_cluster;
    use crate::policy::Policy;

    struct Route;

    impl Referencable for Route {
        fn reference(&self) -> Reference {
            Reference::http_route("route", "kuadrant")
        }
    }

    #[test]
    fn windows_use_largest_whole_unit() {
        assert_eq!(format_window(Duration::from_secs(10)), "10s");
        assert_eq!(format_window(Duration::from_secs(120)), "2m");
        assert_eq!(format_window(Duration::from_secs(3600)), "1h");
        assert_eq!(format_window(Duration::from_millis(1500)), "1500ms");
        assert_eq!(Limit::new(5, Duration::from_secs(10)).window(), Some(Duration::from_secs(10)));
        assert_eq!(parse_window("2x"), None);
        assert_eq!(parse_window("s"), None);
    }

    #[tokio::test]
    async fn limits_land_in_the_requested_block() {
        let policy = rate_limit_policy(&offline_cluster(), "rlp", &Route, None, BTreeMap::new());
        policy
            .add_limit("basic", vec![Limit::new(5, Duration::from_secs(10))], vec![], vec![])
            .await
            .unwrap();
        policy
            .add_limit_to(
                Block::Overrides,
                "per-user",
                vec![Limit::new(2, Duration::from_secs(60))],
                vec![Expression::new("auth.identity.userid")],
                vec![Predicate::new("request.method == 'GET'")],
            )
            .await
            .unwrap();
        policy.set_strategy(Block::Overrides, Strategy::Merge).await.unwrap();

        let spec = policy.to_value().await.unwrap()["spec"].clone();
        assert_eq!(spec["limits"]["basic"]["rates"][0], serde_json::json!({"limit": 5, "window": "10s"}));
        assert_eq!(spec["overrides"]["limits"]["per-user"]["counters"][0]["expression"], "auth.identity.userid");
        assert_eq!(spec["overrides"]["limits"]["per-user"]["when"][0]["predicate"], "request.method == 'GET'");
        assert_eq!(spec["overrides"]["strategy"], "merge");
        assert!(spec.get("defaults").is_none());
        assert_eq!(policy.kind(), "RateLimitPolicy");

        policy.remove_limit("per-user").await.unwrap();
        let spec = policy.to_value().await.unwrap()["spec"].clone();
        assert!(spec["overrides"]["limits"].as_object().unwrap().is_empty());
        assert!(policy.add_limit("empty", vec![], vec![], vec![]).await.is_err());
    }
}
