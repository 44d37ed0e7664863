//! OIDCPolicy (extensions.kuadrant.io/v1alpha1): browser login flow at the
//! gateway plus claim-based authorization.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::rate_limit::target_ref;
use super::{policy_object, PolicyStatus, TargetRef};
use crate::errors::{Error, Result};
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::Resource;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    #[serde(rename = "issuerURL")]
    pub issuer_url: String,
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

impl Provider {
    pub fn new(issuer_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn redirect_uri(mut self, uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(uri.into());
        self
    }
}

/// Token source and required claims
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OidcAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_source: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claims: BTreeMap<String, String>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "extensions.kuadrant.io",
    version = "v1alpha1",
    kind = "OIDCPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct OIDCPolicySpec {
    pub target_ref: TargetRef,
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<OidcAuth>,
}

policy_object!(OIDCPolicy);

pub fn oidc_policy(
    cluster: &ClusterClient,
    name: &str,
    target: &dyn Referencable,
    section_name: Option<&str>,
    provider: Provider,
    labels: BTreeMap<String, String>,
) -> Resource<OIDCPolicy> {
    let mut object = OIDCPolicy::new(
        name,
        OIDCPolicySpec {
            target_ref: target_ref(target, section_name),
            provider,
            auth: None,
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

impl Resource<OIDCPolicy> {
    /// Require token claim `name` to equal `value`
    pub async fn add_claim(&self, name: &str, value: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::config("claim name must not be empty"));
        }
        self.modify(|p| {
            p.spec
                .auth
                .get_or_insert_with(OidcAuth::default)
                .claims
                .insert(name.to_string(), value.to_string());
        })
        .await
    }

    /// Read the token from cookie `name` instead of the Authorization header
    pub async fn set_token_cookie(&self, name: &str) -> Result<()> {
        let source = serde_json::json!({"cookie": {"name": name}});
        self.modify(|p| {
            p.spec.auth.get_or_insert_with(OidcAuth::default).token_source = Some(source.clone());
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

    struct Gw;

    impl Referencable for Gw {
        fn reference(&self) -> Reference {
            Reference::gateway("gw", "kuadrant")
        }
    }

    #[tokio::test]
    async fn provider_keys_keep_their_casing() {
        let policy = oidc_policy(
            &offline_cluster(),
            "oidc",
            &Gw,
            None,
            Provider::new("https://kc/realms/r", "app").redirect_uri("https://app/auth/callback"),
            BTreeMap::new(),
        );
        policy.add_claim("group", "admins").await.unwrap();
        policy.set_token_cookie("jwt").await.unwrap();

        let spec = policy.to_value().await.unwrap()["spec"].clone();
        assert_eq!(spec["provider"]["issuerURL"], "https://kc/realms/r");
        assert_eq!(spec["provider"]["clientID"], "app");
        assert_eq!(spec["provider"]["redirectUri"], "https://app/auth/callback");
        assert_eq!(spec["auth"]["claims"], json!({"group": "admins"}));
        assert_eq!(spec["auth"]["tokenSource"]["cookie"]["name"], "jwt");
        assert!(policy.add_claim("", "x").await.is_err());
    }
}
