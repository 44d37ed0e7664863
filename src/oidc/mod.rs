//! # Identity providers
//!
//! OIDC providers scenarios authenticate against. Providers hand out
//! [`Token`]s that remember the endpoint they came from, so callers can
//! refresh them without holding on to the provider.

pub mod auth0;
pub mod keycloak;

use async_trait::async_trait;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::utils::http::{ensure_success, read_json};

pub use auth0::Auth0;
pub use keycloak::{ClientKind, Keycloak, KeycloakClient, Pkce, Realm, User};

/// Common surface of identity providers
#[async_trait]
pub trait OidcProvider: Send + Sync + std::fmt::Debug {
    /// `iss` of tokens minted by this provider
    async fn issuer_url(&self) -> Result<String>;

    /// OpenID discovery document, fetched once
    async fn well_known(&self) -> Result<Value>;

    /// Password grant for `username`, or the provider's default test user
    async fn get_token(&self, username: Option<&str>, password: Option<&str>) -> Result<Token>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<Token>;

    /// `jwks_uri` from the discovery document
    async fn jwks_uri(&self) -> Result<String> {
        well_known_field(&self.well_known().await?, "jwks_uri")
    }
}

pub(crate) fn well_known_field(document: &Value, field: &str) -> Result<String> {
    document
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::identity(format!("discovery document has no {}", field), None))
}

/// Fetch `<issuer>/.well-known/openid-configuration`
pub(crate) async fn fetch_well_known(client: &Client, issuer: &str) -> Result<Value> {
    let url = format!("{}/.well-known/openid-configuration", issuer.trim_end_matches('/'));
    debug!(%url, "Fetching OIDC discovery document");
    let response = client.get(&url).send().await?;
    read_json(response, "openid discovery").await
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Token endpoint of one client: URL, credentials, extra grant parameters
#[derive(Clone)]
pub struct TokenEndpoint {
    client: Client,
    url: String,
    client_id: String,
    client_secret: Option<String>,
    extra: Vec<(String, String)>,
}

impl std::fmt::Debug for TokenEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenEndpoint")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl TokenEndpoint {
    pub fn new(client: Client, url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            client_id: client_id.into(),
            client_secret: None,
            extra: Vec::new(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Parameter added to every grant (e.g. `scope`, `audience`)
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((name.into(), value.into()));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Run a grant; `params` carries `grant_type` and its fields
    pub async fn grant(self: &Arc<Self>, params: &[(&str, &str)]) -> Result<Token> {
        let mut form: Vec<(String, String)> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        form.push(("client_id".to_string(), self.client_id.clone()));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret".to_string(), secret.clone()));
        }
        for (name, value) in &self.extra {
            if !form.iter().any(|(k, _)| k == name) {
                form.push((name.clone(), value.clone()));
            }
        }

        let response = self.client.post(&self.url).form(&form).send().await?;
        let response = ensure_success(response, "token request")
            .await
            .map_err(|e| Error::identity(e.to_string(), e.status_code()))?;
        let body: TokenResponse = response.json().await?;
        Ok(Token {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            id_token: body.id_token,
            expires_in: body.expires_in,
            endpoint: Arc::clone(self),
        })
    }

    pub async fn password(self: &Arc<Self>, username: &str, password: &str) -> Result<Token> {
        self.grant(&[
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
        ])
        .await
    }

    pub async fn client_credentials(self: &Arc<Self>) -> Result<Token> {
        self.grant(&[("grant_type", "client_credentials")]).await
    }

    pub async fn refresh(self: &Arc<Self>, refresh_token: &str) -> Result<Token> {
        self.grant(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .await
    }

    /// Authorization-code exchange, with the PKCE verifier for public clients
    pub async fn exchange_code(
        self: &Arc<Self>,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<Token> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier));
        }
        self.grant(&params).await
    }
}

/// Access token plus what is needed to refresh it
#[derive(Debug, Clone)]
pub struct Token {
    access_token: String,
    refresh_token: Option<String>,
    id_token: Option<String>,
    expires_in: Option<u64>,
    endpoint: Arc<TokenEndpoint>,
}

impl Token {
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn expires_in(&self) -> Option<u64> {
        self.expires_in
    }

    /// New token from the refresh token; the caller decides when
    pub async fn refresh(&self) -> Result<Token> {
        let refresh_token = self
            .refresh_token
            .as_deref()
            .ok_or_else(|| Error::identity("token carries no refresh token", None))?;
        self.endpoint.refresh(refresh_token).await
    }

    /// JWT payload, decoded without signature verification
    pub fn claims(&self) -> Result<Value> {
        let header = decode_header(&self.access_token)
            .map_err(|e| Error::identity(format!("access token is not a JWT: {}", e), None))?;
        let mut validation = Validation::new(header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        let data = decode::<Value>(&self.access_token, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|e| Error::identity(format!("cannot decode access token: {}", e), None))?;
        Ok(data.claims)
    }
}
