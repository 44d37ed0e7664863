//! Section builders.
//!
//! Each builder borrows the policy and writes through [`Resource::modify`],
//! so the same calls work before commit (local edit) and after (server
//! round trip). Adders return the builder for chaining:
//!
//! ```rust,ignore
//! policy
//!     .identity()
//!     .add_oidc("keycloak", &issuer, None, IdentityOptions::default())
//!     .await?
//!     .add_api_key("api-key", labels, false, IdentityOptions::default())
//!     .await?;
//! ```

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use super::types::{
    AuthValue, Common, DenyResponse, IdentityOptions, ResponseBody, SpiceDbAuthorization,
};
use super::AuthSchemeHost;
use crate::errors::Result;
use crate::policy::rules::Rule;
use crate::policy::Block;
use crate::kubernetes::resource::Resource;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn match_labels(labels: &BTreeMap<String, String>) -> Value {
    json!({ "matchLabels": labels })
}

/// `authentication` section
#[derive(Debug)]
pub struct IdentitySection<'a, K: AuthSchemeHost> {
    resource: &'a Resource<K>,
    block: Block,
}

impl<'a, K: AuthSchemeHost> IdentitySection<'a, K> {
    pub(crate) fn new(resource: &'a Resource<K>, block: Block) -> Self {
        Self { resource, block }
    }

    async fn add(&self, name: &str, body: Value, options: &IdentityOptions) -> Result<&Self> {
        let mut evaluator = object(body);
        options.apply(&mut evaluator);
        let evaluator = Value::Object(evaluator);
        let block = self.block;
        self.resource
            .modify(|o| {
                o.scheme_mut(block)
                    .authentication
                    .insert(name.to_string(), evaluator.clone());
            })
            .await?;
        Ok(self)
    }

    /// JWT validation against the OIDC issuer at `issuer`
    pub async fn add_oidc(
        &self,
        name: &str,
        issuer: &str,
        ttl: Option<u64>,
        options: IdentityOptions,
    ) -> Result<&Self> {
        let mut jwt = json!({ "issuerUrl": issuer });
        if let Some(ttl) = ttl {
            jwt["ttl"] = json!(ttl);
        }
        self.add(name, json!({ "jwt": jwt }), &options).await
    }

    /// API keys stored in Secrets labelled with `selector`
    pub async fn add_api_key(
        &self,
        name: &str,
        selector: &BTreeMap<String, String>,
        all_namespaces: bool,
        options: IdentityOptions,
    ) -> Result<&Self> {
        let body = json!({
            "apiKey": {
                "selector": match_labels(selector),
                "allNamespaces": all_namespaces,
            }
        });
        self.add(name, body, &options).await
    }

    /// Client certificates signed by CAs in Secrets labelled with `selector`
    pub async fn add_mtls(
        &self,
        name: &str,
        selector: &BTreeMap<String, String>,
        options: IdentityOptions,
    ) -> Result<&Self> {
        let body = json!({ "x509": { "selector": match_labels(selector) } });
        self.add(name, body, &options).await
    }

    /// Kubernetes TokenReview of service-account tokens
    pub async fn add_kubernetes(
        &self,
        name: &str,
        audiences: &[String],
        options: IdentityOptions,
    ) -> Result<&Self> {
        let body = json!({ "kubernetesTokenReview": { "audiences": audiences } });
        self.add(name, body, &options).await
    }

    pub async fn add_anonymous(&self, name: &str, options: IdentityOptions) -> Result<&Self> {
        self.add(name, json!({ "anonymous": {} }), &options).await
    }

    /// Identity taken verbatim from `selector` (e.g. a header set upstream)
    pub async fn add_plain(&self, name: &str, selector: &str, options: IdentityOptions) -> Result<&Self> {
        self.add(name, json!({ "plain": { "selector": selector } }), &options)
            .await
    }
}

/// `metadata` section
#[derive(Debug)]
pub struct MetadataSection<'a, K: AuthSchemeHost> {
    resource: &'a Resource<K>,
    block: Block,
}

impl<'a, K: AuthSchemeHost> MetadataSection<'a, K> {
    pub(crate) fn new(resource: &'a Resource<K>, block: Block) -> Self {
        Self { resource, block }
    }

    async fn add(&self, name: &str, body: Value, common: &Common) -> Result<&Self> {
        let mut evaluator = object(body);
        common.apply(&mut evaluator);
        let evaluator = Value::Object(evaluator);
        let block = self.block;
        self.resource
            .modify(|o| {
                o.scheme_mut(block)
                    .metadata
                    .insert(name.to_string(), evaluator.clone());
            })
            .await?;
        Ok(self)
    }

    /// Fetch JSON from an HTTP endpoint
    pub async fn add_http(
        &self,
        name: &str,
        url: &str,
        method: &str,
        headers: BTreeMap<String, AuthValue>,
        common: Common,
    ) -> Result<&Self> {
        let mut http = json!({ "url": url, "method": method.to_uppercase() });
        if !headers.is_empty() {
            http["headers"] = json!(headers);
        }
        self.add(name, json!({ "http": http }), &common).await
    }

    /// OIDC UserInfo of the identity resolved by `identity_source`
    pub async fn add_user_info(&self, name: &str, identity_source: &str, common: Common) -> Result<&Self> {
        let body = json!({ "userInfo": { "identitySource": identity_source } });
        self.add(name, body, &common).await
    }

    /// UMA resource registry; client credentials come from `credentials_secret`
    pub async fn add_uma(
        &self,
        name: &str,
        endpoint: &str,
        credentials_secret: &str,
        common: Common,
    ) -> Result<&Self> {
        let body = json!({
            "uma": {
                "endpoint": endpoint,
                "credentialsRef": { "name": credentials_secret },
            }
        });
        self.add(name, body, &common).await
    }
}

/// `authorization` section
#[derive(Debug)]
pub struct AuthorizationSection<'a, K: AuthSchemeHost> {
    resource: &'a Resource<K>,
    block: Block,
}

impl<'a, K: AuthSchemeHost> AuthorizationSection<'a, K> {
    pub(crate) fn new(resource: &'a Resource<K>, block: Block) -> Self {
        Self { resource, block }
    }

    async fn add(&self, name: &str, body: Value, common: &Common) -> Result<&Self> {
        let mut evaluator = object(body);
        common.apply(&mut evaluator);
        let evaluator = Value::Object(evaluator);
        let block = self.block;
        self.resource
            .modify(|o| {
                o.scheme_mut(block)
                    .authorization
                    .insert(name.to_string(), evaluator.clone());
            })
            .await?;
        Ok(self)
    }

    /// Allow when every rule holds
    pub async fn add_auth_rules(&self, name: &str, rules: Vec<Rule>, common: Common) -> Result<&Self> {
        let body = json!({ "patternMatching": { "patterns": rules } });
        self.add(name, body, &common).await
    }

    /// Inline Rego; `all_values` exposes every rule value, not just `allow`
    pub async fn add_opa_policy(&self, name: &str, rego: &str, all_values: bool, common: Common) -> Result<&Self> {
        let body = json!({ "opa": { "rego": rego, "allValues": all_values } });
        self.add(name, body, &common).await
    }

    /// Rego fetched from `url`, cached for `ttl` seconds
    pub async fn add_external_opa_policy(&self, name: &str, url: &str, ttl: u64, common: Common) -> Result<&Self> {
        let body = json!({ "opa": { "externalPolicy": { "url": url, "ttl": ttl } } });
        self.add(name, body, &common).await
    }

    /// SubjectAccessReview for `user`; non-resource access when
    /// `resource_attributes` is `None`
    pub async fn add_kubernetes(
        &self,
        name: &str,
        user: AuthValue,
        resource_attributes: Option<BTreeMap<String, AuthValue>>,
        common: Common,
    ) -> Result<&Self> {
        let mut review = json!({ "user": user });
        if let Some(attributes) = resource_attributes {
            review["resourceAttributes"] = json!(attributes);
        }
        self.add(name, json!({ "kubernetesSubjectAccessReview": review }), &common)
            .await
    }

    pub async fn add_spicedb(&self, name: &str, spicedb: SpiceDbAuthorization, common: Common) -> Result<&Self> {
        self.add(name, json!({ "spicedb": spicedb }), &common).await
    }
}

/// `response` section
#[derive(Debug)]
pub struct ResponseSection<'a, K: AuthSchemeHost> {
    resource: &'a Resource<K>,
    block: Block,
}

impl<'a, K: AuthSchemeHost> ResponseSection<'a, K> {
    pub(crate) fn new(resource: &'a Resource<K>, block: Block) -> Self {
        Self { resource, block }
    }

    /// Header added to requests that pass, named `name`
    pub async fn add_success_header(&self, name: &str, body: ResponseBody, common: Common) -> Result<&Self> {
        let mut evaluator = body.to_evaluator();
        common.apply(&mut evaluator);
        let evaluator = Value::Object(evaluator);
        let block = self.block;
        self.resource
            .modify(|o| {
                o.scheme_mut(block)
                    .response_mut()
                    .success
                    .headers
                    .insert(name.to_string(), evaluator.clone());
            })
            .await?;
        Ok(self)
    }

    /// Dynamic metadata emitted to the proxy for requests that pass
    pub async fn add_success_dynamic(&self, name: &str, body: ResponseBody, common: Common) -> Result<&Self> {
        let mut evaluator = body.to_evaluator();
        common.apply(&mut evaluator);
        let evaluator = Value::Object(evaluator);
        let block = self.block;
        self.resource
            .modify(|o| {
                let success = &mut o.scheme_mut(block).response_mut().success;
                let target = if K::USES_FILTERS {
                    &mut success.filters
                } else {
                    &mut success.dynamic_metadata
                };
                target.insert(name.to_string(), evaluator.clone());
            })
            .await?;
        Ok(self)
    }

    pub async fn set_unauthenticated(&self, response: DenyResponse) -> Result<&Self> {
        let block = self.block;
        self.resource
            .modify(|o| o.scheme_mut(block).response_mut().unauthenticated = Some(response.clone()))
            .await?;
        Ok(self)
    }

    pub async fn set_unauthorized(&self, response: DenyResponse) -> Result<&Self> {
        let block = self.block;
        self.resource
            .modify(|o| o.scheme_mut(block).response_mut().unauthorized = Some(response.clone()))
            .await?;
        Ok(self)
    }
}
