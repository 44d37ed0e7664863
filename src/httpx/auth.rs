//! Credentials attached to test requests.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::Result;
use crate::oidc::Token;

/// Where a credential goes on the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// `Authorization: <prefix> <value>`
    AuthorizationHeader { prefix: String },
    /// `<name>: <value>`
    Header(String),
    /// `?<name>=<value>`
    Query(String),
    /// `Cookie: <name>=<value>`
    Cookie(String),
}

impl Placement {
    pub fn bearer() -> Self {
        Placement::AuthorizationHeader {
            prefix: "Bearer".to_string(),
        }
    }

    pub fn authorization(prefix: impl Into<String>) -> Self {
        Placement::AuthorizationHeader {
            prefix: prefix.into(),
        }
    }

    /// Apply `value` to `request`
    pub fn apply(&self, request: reqwest::RequestBuilder, value: &str) -> reqwest::RequestBuilder {
        match self {
            Placement::AuthorizationHeader { prefix } if prefix.is_empty() => {
                request.header(reqwest::header::AUTHORIZATION, value)
            }
            Placement::AuthorizationHeader { prefix } => {
                request.header(reqwest::header::AUTHORIZATION, format!("{} {}", prefix, value))
            }
            Placement::Header(name) => request.header(name.as_str(), value),
            Placement::Query(name) => request.query(&[(name.as_str(), value)]),
            Placement::Cookie(name) => {
                request.header(reqwest::header::COOKIE, format!("{}={}", name, value))
            }
        }
    }
}

/// Source of credentials for every request of a client
#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    /// Current credential value and its placement
    async fn credential(&self) -> Result<(Placement, String)>;

    /// Obtain fresh credentials after a 403; `false` when nothing changed
    async fn refresh(&self) -> Result<bool> {
        Ok(false)
    }
}

/// Static API key
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    key: String,
    placement: Placement,
}

impl ApiKeyAuth {
    /// `Authorization: APIKEY <key>`, the authorization service's default
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_placement(key, Placement::authorization("APIKEY"))
    }

    pub fn with_placement(key: impl Into<String>, placement: Placement) -> Self {
        Self {
            key: key.into(),
            placement,
        }
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuth {
    async fn credential(&self) -> Result<(Placement, String)> {
        Ok((self.placement.clone(), self.key.clone()))
    }
}

/// OIDC access token, refreshed through its provider
#[derive(Debug)]
pub struct OidcAuth {
    token: Mutex<Token>,
    placement: Placement,
}

impl OidcAuth {
    /// `Authorization: Bearer <access token>`
    pub fn new(token: Token) -> Self {
        Self::with_placement(token, Placement::bearer())
    }

    pub fn with_placement(token: Token, placement: Placement) -> Self {
        Self {
            token: Mutex::new(token),
            placement,
        }
    }

    pub async fn token(&self) -> Token {
        self.token.lock().await.clone()
    }
}

#[async_trait]
impl Authenticator for OidcAuth {
    async fn credential(&self) -> Result<(Placement, String)> {
        let token = self.token.lock().await;
        Ok((self.placement.clone(), token.access_token().to_string()))
    }

    async fn refresh(&self) -> Result<bool> {
        let mut token = self.token.lock().await;
        let fresh = token.refresh().await?;
        debug!("Refreshed OIDC token after rejection");
        *token = fresh;
        Ok(true)
    }
}
