//! Building blocks of authorization evaluators.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::httpx::Placement;
use crate::policy::rules::Rule;

/// Static value, JSON selector, or CEL expression
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AuthValue {
    Value(Value),
    Selector(String),
    Expression(String),
}

impl AuthValue {
    pub fn value(value: impl Into<Value>) -> Self {
        AuthValue::Value(value.into())
    }

    pub fn selector(selector: impl Into<String>) -> Self {
        AuthValue::Selector(selector.into())
    }

    pub fn expression(expression: impl Into<String>) -> Self {
        AuthValue::Expression(expression.into())
    }
}

/// Where the authorization service looks for a credential
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Credentials {
    AuthorizationHeader { prefix: String },
    CustomHeader { name: String },
    QueryString { name: String },
    Cookie { name: String },
}

impl Credentials {
    pub fn authorization_header(prefix: impl Into<String>) -> Self {
        Credentials::AuthorizationHeader {
            prefix: prefix.into(),
        }
    }

    pub fn custom_header(name: impl Into<String>) -> Self {
        Credentials::CustomHeader { name: name.into() }
    }

    pub fn query_string(name: impl Into<String>) -> Self {
        Credentials::QueryString { name: name.into() }
    }

    pub fn cookie(name: impl Into<String>) -> Self {
        Credentials::Cookie { name: name.into() }
    }
}

/// Clients send the credential where the policy expects it
impl From<&Credentials> for Placement {
    fn from(credentials: &Credentials) -> Self {
        match credentials {
            Credentials::AuthorizationHeader { prefix } => Placement::authorization(prefix.clone()),
            Credentials::CustomHeader { name } => Placement::Header(name.clone()),
            Credentials::QueryString { name } => Placement::Query(name.clone()),
            Credentials::Cookie { name } => Placement::Cookie(name.clone()),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Cache {
    pub key: AuthValue,
    pub ttl: u64,
}

/// Options every evaluator accepts
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Common {
    pub priority: Option<i32>,
    pub when: Vec<Rule>,
    pub metrics: bool,
    pub cache: Option<Cache>,
}

impl Common {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn when(mut self, rule: Rule) -> Self {
        self.when.push(rule);
        self
    }

    pub fn metrics(mut self, metrics: bool) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache(mut self, key: AuthValue, ttl: u64) -> Self {
        self.cache = Some(Cache { key, ttl });
        self
    }

    pub(crate) fn apply(&self, evaluator: &mut Map<String, Value>) {
        if let Some(priority) = self.priority {
            evaluator.insert("priority".to_string(), json!(priority));
        }
        if !self.when.is_empty() {
            evaluator.insert("when".to_string(), json!(self.when));
        }
        if self.metrics {
            evaluator.insert("metrics".to_string(), json!(true));
        }
        if let Some(cache) = &self.cache {
            evaluator.insert("cache".to_string(), json!(cache));
        }
    }
}

/// Identity options: credentials location, extra identity properties, and
/// the common evaluator options
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentityOptions {
    pub credentials: Option<Credentials>,
    pub defaults: BTreeMap<String, AuthValue>,
    pub overrides: BTreeMap<String, AuthValue>,
    pub common: Common,
}

impl IdentityOptions {
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Property added to the resolved identity unless already present
    pub fn default_property(mut self, name: impl Into<String>, value: AuthValue) -> Self {
        self.defaults.insert(name.into(), value);
        self
    }

    /// Property added to the resolved identity, replacing any present
    pub fn override_property(mut self, name: impl Into<String>, value: AuthValue) -> Self {
        self.overrides.insert(name.into(), value);
        self
    }

    pub fn common(mut self, common: Common) -> Self {
        self.common = common;
        self
    }

    pub(crate) fn apply(&self, evaluator: &mut Map<String, Value>) {
        if let Some(credentials) = &self.credentials {
            evaluator.insert("credentials".to_string(), json!(credentials));
        }
        if !self.defaults.is_empty() {
            evaluator.insert("defaults".to_string(), json!(self.defaults));
        }
        if !self.overrides.is_empty() {
            evaluator.insert("overrides".to_string(), json!(self.overrides));
        }
        self.common.apply(evaluator);
    }
}

/// Response to denied requests
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DenyResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<AuthValue>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, AuthValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<AuthValue>,
}

impl DenyResponse {
    pub fn code(code: u16) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn message(mut self, message: AuthValue) -> Self {
        self.message = Some(message);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: AuthValue) -> Self {
        self.headers.insert(name.into(), value);
        self
    }

    pub fn body(mut self, body: AuthValue) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SigningKeyRef {
    pub name: String,
    pub algorithm: String,
}

/// Festival wristband minted on successful authentication
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WristbandResponse {
    pub issuer: String,
    pub signing_key_refs: Vec<SigningKeyRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_claims: BTreeMap<String, AuthValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_duration: Option<u64>,
}

impl WristbandResponse {
    /// Signed with the ES256 key stored in secret `signing_secret`
    pub fn new(issuer: impl Into<String>, signing_secret: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            signing_key_refs: vec![SigningKeyRef {
                name: signing_secret.into(),
                algorithm: "ES256".to_string(),
            }],
            custom_claims: BTreeMap::new(),
            token_duration: None,
        }
    }

    pub fn claim(mut self, name: impl Into<String>, value: AuthValue) -> Self {
        self.custom_claims.insert(name.into(), value);
        self
    }
}

/// Body of a success response item
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseBody {
    /// JSON object built from properties
    Json(BTreeMap<String, AuthValue>),
    Plain(AuthValue),
    Wristband(WristbandResponse),
}

impl ResponseBody {
    pub fn json<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, AuthValue)>,
        K: Into<String>,
    {
        ResponseBody::Json(properties.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub(crate) fn to_evaluator(&self) -> Map<String, Value> {
        let mut evaluator = Map::new();
        match self {
            ResponseBody::Json(properties) => {
                evaluator.insert("json".to_string(), json!({ "properties": properties }));
            }
            ResponseBody::Plain(value) => {
                evaluator.insert("plain".to_string(), json!(value));
            }
            ResponseBody::Wristband(wristband) => {
                evaluator.insert("wristband".to_string(), json!(wristband));
            }
        }
        evaluator
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct SpiceDbObject {
    pub kind: AuthValue,
    pub name: AuthValue,
}

/// Permission check against SpiceDB
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpiceDbAuthorization {
    pub endpoint: String,
    pub insecure: bool,
    pub shared_secret_ref: SecretKeyRef,
    pub permission: AuthValue,
    pub resource: SpiceDbObject,
    pub subject: SpiceDbObject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_and_credentials_use_externally_tagged_shapes() {
        assert_eq!(json!(AuthValue::selector("auth.identity.sub")), json!({"selector": "auth.identity.sub"}));
        assert_eq!(json!(AuthValue::value(42)), json!({"value": 42}));
        assert_eq!(
            json!(Credentials::authorization_header("APIKEY")),
            json!({"authorizationHeader": {"prefix": "APIKEY"}})
        );
        assert_eq!(Placement::from(&Credentials::query_string("t")), Placement::Query("t".to_string()));
    }

    #[test]
    fn common_options_only_emit_what_is_set() {
        let mut evaluator = Map::new();
        Common::default().apply(&mut evaluator);
        assert!(evaluator.is_empty());

        Common::default()
            .priority(1)
            .metrics(true)
            .when(Rule::eq("context.request.http.method", "GET"))
            .cache(AuthValue::selector("context.request.http.path"), 30)
            .apply(&mut evaluator);
        assert_eq!(evaluator["priority"], 1);
        assert_eq!(evaluator["metrics"], true);
        assert_eq!(evaluator["when"][0]["operator"], "eq");
        assert_eq!(evaluator["cache"]["ttl"], 30);
    }

    #[test]
    fn wristband_body_names_its_signing_key() {
        let body = ResponseBody::Wristband(
            WristbandResponse::new("https://authorino/wristband", "wristband-key")
                .claim("username", AuthValue::selector("auth.identity.preferred_username")),
        )
        .to_evaluator();
        assert_eq!(body["wristband"]["signingKeyRefs"][0]["algorithm"], "ES256");
        assert_eq!(
            body["wristband"]["customClaims"]["username"]["selector"],
            "auth.identity.preferred_username"
        );
    }
}
