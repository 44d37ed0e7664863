//! HTTPRoute (gateway.networking.k8s.io/v1) and the affected-by protocol.
//!
//! Policy controllers report on every route they touch with a parent
//! condition `kuadrant.io/<PolicyKind>Affected`; [`affected_by`] reads it.

use async_trait::async_trait;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::backend::BackendRef;
use super::{GatewayRoute, Reference, Referencable, GATEWAY_API_GROUP};
use crate::errors::Result;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::conditions::{Condition, ConditionMatcher};
use crate::kubernetes::resource::{Lifecycle, Readiness, Resource};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "gateway.networking.k8s.io",
    version = "v1",
    kind = "HTTPRoute",
    namespaced,
    status = "HttpRouteStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteSpec {
    #[serde(default)]
    pub parent_refs: Vec<ParentRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub rules: Vec<HttpRouteRule>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParentRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl From<&Reference> for ParentRef {
    fn from(reference: &Reference) -> Self {
        Self {
            group: Some(reference.group.clone()),
            kind: Some(reference.kind.clone()),
            name: reference.name.clone(),
            namespace: reference.namespace.clone(),
            section_name: None,
        }
    }
}

/// One routing rule: matches plus backends
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpRouteMatch>,
    #[serde(default)]
    pub backend_refs: Vec<BackendRef>,
}

impl HttpRouteRule {
    /// Route everything under `prefix` to `backend`
    pub fn path_prefix(prefix: &str, backend: BackendRef) -> Self {
        Self {
            matches: vec![HttpRouteMatch::path(PathMatchType::PathPrefix, prefix)],
            backend_refs: vec![backend],
        }
    }

    pub fn new(matches: Vec<HttpRouteMatch>, backend: BackendRef) -> Self {
        Self {
            matches,
            backend_refs: vec![backend],
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum PathMatchType {
    Exact,
    PathPrefix,
    RegularExpression,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PathMatch {
    #[serde(rename = "type")]
    pub type_: PathMatchType,
    pub value: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMatch {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathMatch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

impl HttpRouteMatch {
    pub fn path(type_: PathMatchType, value: &str) -> Self {
        Self {
            path: Some(PathMatch {
                type_,
                value: value.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn header(name: &str, value: &str) -> Self {
        Self {
            headers: vec![HeaderMatch {
                type_: Some("Exact".to_string()),
                name: name.to_string(),
                value: value.to_string(),
            }],
            ..Self::default()
        }
    }

    pub fn method(method: &str) -> Self {
        Self {
            method: Some(method.to_ascii_uppercase()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteStatus {
    #[serde(default)]
    pub parents: Vec<RouteParentStatus>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteParentStatus {
    pub parent_ref: ParentRef,
    #[serde(default)]
    pub controller_name: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HTTPRoute {
    fn parent_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.status
            .iter()
            .flat_map(|s| s.parents.iter())
            .flat_map(|p| p.conditions.iter())
    }
}

impl Readiness for HTTPRoute {
    /// Every parent accepted the route
    fn is_ready(&self) -> bool {
        let accepted = ConditionMatcher::is_true("Accepted");
        match &self.status {
            Some(status) if !status.parents.is_empty() => status
                .parents
                .iter()
                .all(|p| accepted.any(&p.conditions)),
            _ => false,
        }
    }
}

/// `kuadrant.io/<kind>Affected=True`, naming the policy when a message is present
pub fn affected_by<'a>(
    conditions: impl IntoIterator<Item = &'a Condition>,
    kind: &str,
    policy: &Reference,
) -> bool {
    let matcher = ConditionMatcher::is_true(format!("kuadrant.io/{}Affected", kind));
    let name = policy.namespaced_name();
    conditions.into_iter().any(|c| {
        matcher.matches(c)
            && c.message
                .as_deref()
                .map(|m| lists_policy(m, &name))
                .unwrap_or(true)
    })
}

/// `name` appears as a whole `namespace/name` token, e.g. in
/// `Object affected by AuthPolicy [ns/a ns/b]`
fn lists_policy(message: &str, name: &str) -> bool {
    message
        .split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '/')))
        .any(|token| token.trim_end_matches('.') == name)
}

/// HTTPRoute wrapper; every write goes through [`Resource::modify`]
#[derive(Debug)]
pub struct HttpRoute {
    resource: Resource<HTTPRoute>,
}

impl HttpRoute {
    /// Uncommitted route attached to `parent`
    pub fn new(
        cluster: &ClusterClient,
        name: &str,
        parent: &dyn Referencable,
        labels: BTreeMap<String, String>,
    ) -> Self {
        let mut object = HTTPRoute::new(
            name,
            HttpRouteSpec {
                parent_refs: vec![ParentRef::from(&parent.reference())],
                hostnames: Vec::new(),
                rules: Vec::new(),
            },
        );
        object.metadata.labels = Some(labels);
        Self {
            resource: Resource::new(cluster, object),
        }
    }

    pub fn resource(&self) -> &Resource<HTTPRoute> {
        &self.resource
    }

    pub fn name(&self) -> &str {
        self.resource.name()
    }

    pub async fn hostnames(&self) -> Vec<String> {
        self.resource.read(|r| r.spec.hostnames.clone()).await
    }

    pub async fn rules(&self) -> Vec<HttpRouteRule> {
        self.resource.read(|r| r.spec.rules.clone()).await
    }

    /// Conditions of every parent status
    pub async fn parent_conditions(&self) -> Vec<Condition> {
        self.resource
            .read(|r| r.parent_conditions().cloned().collect())
            .await
    }
}

impl Referencable for HttpRoute {
    fn reference(&self) -> Reference {
        Reference::new(
            GATEWAY_API_GROUP,
            "HTTPRoute",
            self.resource.name(),
            Some(self.resource.namespace().to_string()),
        )
    }
}

#[async_trait]
impl Lifecycle for HttpRoute {
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
impl GatewayRoute for HttpRoute {
    async fn add_hostname(&self, hostname: &str) -> Result<()> {
        self.resource
            .modify(|r| {
                if !r.spec.hostnames.iter().any(|h| h == hostname) {
                    r.spec.hostnames.push(hostname.to_string());
                }
            })
            .await
    }

    async fn remove_hostname(&self, hostname: &str) -> Result<()> {
        self.resource
            .modify(|r| r.spec.hostnames.retain(|h| h != hostname))
            .await
    }

    async fn remove_all_hostnames(&self) -> Result<()> {
        self.resource.modify(|r| r.spec.hostnames.clear()).await
    }

    async fn add_rule(&self, rule: HttpRouteRule) -> Result<()> {
        self.resource
            .modify(|r| r.spec.rules.push(rule.clone()))
            .await
    }

    async fn remove_rule(&self, rule: &HttpRouteRule) -> Result<()> {
        self.resource
            .modify(|r| r.spec.rules.retain(|existing| existing != rule))
            .await
    }

    async fn remove_all_rules(&self) -> Result<()> {
        self.resource.modify(|r| r.spec.rules.clear()).await
    }

    async fn is_affected_by(&self, kind: &str, policy: &Reference) -> bool {
        if let Err(e) = self.resource.refresh().await {
            debug!(error = %e, "Refresh before affected-by check failed");
        }
        self.resource
            .read(|r| affected_by(r.parent_conditions(), kind, policy))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::Reference;
    use crate::kubernetes::offline_cluster;

    struct Parent;

    impl Referencable for Parent {
        fn reference(&self) -> Reference {
            Reference::gateway("gw", "kuadrant")
        }
    }

    fn backend() -> BackendRef {
        BackendRef::service("httpbin", 8080)
    }

    #[tokio::test]
    async fn uncommitted_route_edits_stay_local() {
        let route = HttpRoute::new(&offline_cluster(), "route", &Parent, BTreeMap::new());
        route.add_hostname("a.example.com").await.unwrap();
        route.add_hostname("a.example.com").await.unwrap();
        route.add_hostname("b.example.com").await.unwrap();
        route.remove_hostname("a.example.com").await.unwrap();
        assert_eq!(route.hostnames().await, vec!["b.example.com"]);

        let rule = HttpRouteRule::path_prefix("/anything", backend());
        route.add_rule(rule.clone()).await.unwrap();
        route
            .add_rule(HttpRouteRule::new(vec![HttpRouteMatch::method("get")], backend()))
            .await
            .unwrap();
        route.remove_rule(&rule).await.unwrap();
        let rules = route.rules().await;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].matches[0].method.as_deref(), Some("GET"));

        let value = route.resource().to_value().await.unwrap();
        assert_eq!(value["spec"]["parentRefs"][0]["name"], "gw");
        assert_eq!(value["spec"]["rules"][0]["backendRefs"][0]["port"], 8080);
    }

    fn condition(type_: &str, status: &str, message: Option<&str>) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            message: message.map(str::to_string),
            ..Condition::default()
        }
    }

    #[test]
    fn affected_by_matches_kind_status_and_policy() {
        let policy = Reference::new("kuadrant.io", "AuthPolicy", "authz-abc", Some("kuadrant".to_string()));
        let conditions = vec![
            condition("Accepted", "True", None),
            condition(
                "kuadrant.io/AuthPolicyAffected",
                "True",
                Some("Object affected by AuthPolicy [kuadrant/authz-abc]"),
            ),
        ];
        assert!(affected_by(&conditions, "AuthPolicy", &policy));
        assert!(!affected_by(&conditions, "RateLimitPolicy", &policy));

        let other = Reference::new("kuadrant.io", "AuthPolicy", "other", Some("kuadrant".to_string()));
        assert!(!affected_by(&conditions, "AuthPolicy", &other));

        let not_affected = vec![condition("kuadrant.io/AuthPolicyAffected", "False", None)];
        assert!(!affected_by(&not_affected, "AuthPolicy", &policy));
    }

    #[test]
    fn affected_by_needs_the_whole_policy_name() {
        let policy = Reference::new("kuadrant.io", "AuthPolicy", "authz-abc", Some("kuadrant".to_string()));
        let longer = vec![condition(
            "kuadrant.io/AuthPolicyAffected",
            "True",
            Some("Object affected by AuthPolicy [kuadrant/authz-abcd]"),
        )];
        assert!(!affected_by(&longer, "AuthPolicy", &policy));

        let prefixed = vec![condition(
            "kuadrant.io/AuthPolicyAffected",
            "True",
            Some("Object affected by AuthPolicy [other-kuadrant/authz-abc]"),
        )];
        assert!(!affected_by(&prefixed, "AuthPolicy", &policy));

        let several = vec![condition(
            "kuadrant.io/AuthPolicyAffected",
            "True",
            Some("Object affected by AuthPolicy [kuadrant/authz-abcd kuadrant/authz-abc]"),
        )];
        assert!(affected_by(&several, "AuthPolicy", &policy));
    }

    #[test]
    fn ready_once_every_parent_accepts() {
        let mut route = HTTPRoute::new("r", HttpRouteSpec::default());
        assert!(!route.is_ready());
        route.status = Some(HttpRouteStatus {
            parents: vec![RouteParentStatus {
                parent_ref: ParentRef::from(&Reference::gateway("gw", "kuadrant")),
                controller_name: None,
                conditions: vec![condition("Accepted", "True", None)],
            }],
        });
        assert!(route.is_ready());
    }
}
