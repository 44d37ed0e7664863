//! AuthConfig (authorino.kuadrant.io/v1beta3) and AuthPolicy (kuadrant.io/v1).
//!
//! Both carry the same four ordered sections (identity, metadata,
//! authorization, response); the builders in [`sections`] write to either
//! through [`AuthSchemeHost`]. AuthPolicy additionally has `defaults` and
//! `overrides` blocks mirroring the top-level rules.

pub mod sections;
pub mod types;

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::rules::{evaluate_all, Patterns, Rule};
use super::{policy_object, Block, PolicyStatus, Strategy, TargetRef};
use crate::errors::Result;
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::conditions::{Condition, ConditionMatcher, HasConditions};
use crate::kubernetes::resource::{KubeObject, Readiness, Resource};

pub use sections::{AuthorizationSection, IdentitySection, MetadataSection, ResponseSection};
pub use types::{
    AuthValue, Cache, Common, Credentials, DenyResponse, IdentityOptions, ResponseBody, SecretKeyRef,
    SpiceDbAuthorization, SpiceDbObject, WristbandResponse,
};

/// Success responses: headers plus dynamic metadata
///
/// AuthConfig names the latter `dynamicMetadata`, AuthPolicy `filters`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuccessResponses {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dynamic_metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthenticated: Option<DenyResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unauthorized: Option<DenyResponse>,
    #[serde(default)]
    pub success: SuccessResponses,
}

/// The four ordered sections plus callbacks
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthScheme {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authentication: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub authorization: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseRules>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub callbacks: BTreeMap<String, Value>,
}

impl AuthScheme {
    pub fn is_empty(&self) -> bool {
        self == &AuthScheme::default()
    }

    pub fn response_mut(&mut self) -> &mut ResponseRules {
        self.response.get_or_insert_with(ResponseRules::default)
    }

    /// Evaluator called `name` in `section`
    pub fn evaluator(&self, section: Section, name: &str) -> Option<&Value> {
        match section {
            Section::Identity => self.authentication.get(name),
            Section::Metadata => self.metadata.get(name),
            Section::Authorization => self.authorization.get(name),
            Section::Response => self.response.as_ref().and_then(|r| {
                r.success
                    .headers
                    .get(name)
                    .or_else(|| r.success.dynamic_metadata.get(name))
                    .or_else(|| r.success.filters.get(name))
            }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Section {
    Identity,
    Metadata,
    Authorization,
    Response,
}

/// Custom resources holding an [`AuthScheme`]
pub trait AuthSchemeHost: KubeObject {
    /// Dynamic metadata lives under `filters` rather than `dynamicMetadata`
    const USES_FILTERS: bool;

    fn scheme(&self, block: Block) -> Option<&AuthScheme>;

    fn scheme_mut(&mut self, block: Block) -> &mut AuthScheme;

    fn patterns_mut(&mut self) -> &mut Patterns;

    fn patterns(&self) -> &Patterns;

    /// `when` of the whole policy, or of a defaults/overrides block
    fn when(&self, block: Block) -> &[Rule];

    fn when_mut(&mut self, block: Block) -> &mut Vec<Rule>;

    /// Whether evaluator `name` would run for `document`: the policy-level
    /// `when` and the evaluator's own `when` must both hold
    fn evaluator_active(&self, block: Block, section: Section, name: &str, document: &Value) -> Result<bool> {
        let Some(evaluator) = self.scheme(block).and_then(|s| s.evaluator(section, name)) else {
            return Ok(false);
        };
        if !evaluate_all(self.when(block), document, self.patterns())? {
            return Ok(false);
        }
        let local: Vec<Rule> = match evaluator.get("when") {
            Some(when) => serde_json::from_value(when.clone())?,
            None => Vec::new(),
        };
        evaluate_all(&local, document, self.patterns())
    }
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "authorino.kuadrant.io",
    version = "v1beta3",
    kind = "AuthConfig",
    namespaced,
    status = "AuthConfigStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigSpec {
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patterns: Patterns,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Rule>,
    #[serde(flatten)]
    pub scheme: AuthScheme,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfigStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<Value>,
}

impl HasConditions for AuthConfig {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

impl Readiness for AuthConfig {
    fn is_ready(&self) -> bool {
        self.has_condition(&ConditionMatcher::is_true("Ready"))
    }

    fn has_failed(&self) -> bool {
        self.has_condition(&ConditionMatcher::is_false("Ready"))
    }
}

impl AuthSchemeHost for AuthConfig {
    const USES_FILTERS: bool = false;

    fn scheme(&self, _block: Block) -> Option<&AuthScheme> {
        Some(&self.spec.scheme)
    }

    fn scheme_mut(&mut self, _block: Block) -> &mut AuthScheme {
        &mut self.spec.scheme
    }

    fn patterns_mut(&mut self) -> &mut Patterns {
        &mut self.spec.patterns
    }

    fn patterns(&self) -> &Patterns {
        &self.spec.patterns
    }

    fn when(&self, _block: Block) -> &[Rule] {
        &self.spec.when
    }

    fn when_mut(&mut self, _block: Block) -> &mut Vec<Rule> {
        &mut self.spec.when
    }
}

/// `defaults` / `overrides` block of an AuthPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthBlock {
    #[serde(default)]
    pub rules: AuthScheme,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "kuadrant.io",
    version = "v1",
    kind = "AuthPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct AuthPolicySpec {
    pub target_ref: TargetRef,
    #[serde(default, skip_serializing_if = "AuthScheme::is_empty")]
    pub rules: AuthScheme,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patterns: Patterns,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<AuthBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<AuthBlock>,
}

policy_object!(AuthPolicy);

impl AuthPolicySpec {
    fn block(&self, block: Block) -> Option<&AuthBlock> {
        match block {
            Block::Root => None,
            Block::Defaults => self.defaults.as_ref(),
            Block::Overrides => self.overrides.as_ref(),
        }
    }

    fn block_mut(&mut self, block: Block) -> Option<&mut AuthBlock> {
        match block {
            Block::Root => None,
            Block::Defaults => Some(self.defaults.get_or_insert_with(AuthBlock::default)),
            Block::Overrides => Some(self.overrides.get_or_insert_with(AuthBlock::default)),
        }
    }
}

impl AuthSchemeHost for AuthPolicy {
    const USES_FILTERS: bool = true;

    fn scheme(&self, block: Block) -> Option<&AuthScheme> {
        match block {
            Block::Root => Some(&self.spec.rules),
            _ => self.spec.block(block).map(|b| &b.rules),
        }
    }

    fn scheme_mut(&mut self, block: Block) -> &mut AuthScheme {
        match block {
            Block::Root => &mut self.spec.rules,
            Block::Defaults => &mut self.spec.defaults.get_or_insert_with(AuthBlock::default).rules,
            Block::Overrides => &mut self.spec.overrides.get_or_insert_with(AuthBlock::default).rules,
        }
    }

    fn patterns_mut(&mut self) -> &mut Patterns {
        &mut self.spec.patterns
    }

    fn patterns(&self) -> &Patterns {
        &self.spec.patterns
    }

    fn when(&self, block: Block) -> &[Rule] {
        match self.spec.block(block) {
            Some(b) => &b.when,
            None => &self.spec.when,
        }
    }

    fn when_mut(&mut self, block: Block) -> &mut Vec<Rule> {
        match block {
            Block::Root => &mut self.spec.when,
            Block::Defaults => &mut self.spec.defaults.get_or_insert_with(AuthBlock::default).when,
            Block::Overrides => &mut self.spec.overrides.get_or_insert_with(AuthBlock::default).when,
        }
    }
}

/// Uncommitted AuthConfig protecting `hosts`
pub fn auth_config(
    cluster: &ClusterClient,
    name: &str,
    hosts: Vec<String>,
    labels: BTreeMap<String, String>,
) -> Resource<AuthConfig> {
    let mut object = AuthConfig::new(
        name,
        AuthConfigSpec {
            hosts,
            ..AuthConfigSpec::default()
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

/// Uncommitted AuthPolicy attached to `target`, optionally to one of its sections
pub fn auth_policy(
    cluster: &ClusterClient,
    name: &str,
    target: &dyn Referencable,
    section_name: Option<&str>,
    labels: BTreeMap<String, String>,
) -> Resource<AuthPolicy> {
    let target_ref = match section_name {
        Some(section) => TargetRef::section(target, section),
        None => TargetRef::to(target),
    };
    let mut object = AuthPolicy::new(
        name,
        AuthPolicySpec {
            target_ref,
            ..AuthPolicySpec::default()
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

impl<K: AuthSchemeHost> Resource<K> {
    pub fn identity(&self) -> IdentitySection<'_, K> {
        IdentitySection::new(self, Block::Root)
    }

    pub fn metadata(&self) -> MetadataSection<'_, K> {
        MetadataSection::new(self, Block::Root)
    }

    pub fn authorization(&self) -> AuthorizationSection<'_, K> {
        AuthorizationSection::new(self, Block::Root)
    }

    pub fn responses(&self) -> ResponseSection<'_, K> {
        ResponseSection::new(self, Block::Root)
    }

    /// Register named pattern groups for `patternRef`
    pub async fn add_patterns(&self, patterns: Patterns) -> Result<()> {
        self.modify(|object| {
            object
                .patterns_mut()
                .extend(patterns.iter().map(|(k, v)| (k.clone(), v.clone())));
        })
        .await
    }

    /// Narrow the whole policy with `rule`
    pub async fn add_rule(&self, rule: Rule) -> Result<()> {
        self.modify(|object| object.when_mut(Block::Root).push(rule.clone()))
            .await
    }
}

impl Resource<AuthConfig> {
    pub async fn add_host(&self, host: &str) -> Result<()> {
        self.modify(|ac| {
            if !ac.spec.hosts.iter().any(|h| h == host) {
                ac.spec.hosts.push(host.to_string());
            }
        })
        .await
    }

    pub async fn remove_host(&self, host: &str) -> Result<()> {
        self.modify(|ac| ac.spec.hosts.retain(|h| h != host)).await
    }

    pub async fn remove_all_hosts(&self) -> Result<()> {
        self.modify(|ac| ac.spec.hosts.clear()).await
    }
}

/// Builders targeting the `defaults` or `overrides` block of an AuthPolicy
#[derive(Debug, Clone, Copy)]
pub struct AuthBlockBuilder<'a> {
    resource: &'a Resource<AuthPolicy>,
    block: Block,
}

impl<'a> AuthBlockBuilder<'a> {
    pub fn identity(&self) -> IdentitySection<'a, AuthPolicy> {
        IdentitySection::new(self.resource, self.block)
    }

    pub fn metadata(&self) -> MetadataSection<'a, AuthPolicy> {
        MetadataSection::new(self.resource, self.block)
    }

    pub fn authorization(&self) -> AuthorizationSection<'a, AuthPolicy> {
        AuthorizationSection::new(self.resource, self.block)
    }

    pub fn responses(&self) -> ResponseSection<'a, AuthPolicy> {
        ResponseSection::new(self.resource, self.block)
    }

    pub async fn strategy(&self, strategy: Strategy) -> Result<()> {
        let block = self.block;
        self.resource
            .modify(|p| {
                if let Some(b) = p.spec.block_mut(block) {
                    b.strategy = Some(strategy);
                }
            })
            .await
    }

    /// Narrow this block with `rule`
    pub async fn add_rule(&self, rule: Rule) -> Result<()> {
        let block = self.block;
        self.resource
            .modify(|p| p.when_mut(block).push(rule.clone()))
            .await
    }
}

impl Resource<AuthPolicy> {
    /// Rules that routes may override by defining a rule of the same name
    pub fn defaults(&self) -> AuthBlockBuilder<'_> {
        AuthBlockBuilder {
            resource: self,
            block: Block::Defaults,
        }
    }

    /// Rules that win over route-level rules unconditionally
    pub fn overrides(&self) -> AuthBlockBuilder<'_> {
        AuthBlockBuilder {
            resource: self,
            block: Block::Overrides,
        }
    }
}
