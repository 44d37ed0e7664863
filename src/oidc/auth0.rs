//! Auth0 tenant used for cross-provider OIDC scenarios.
//!
//! Unlike Keycloak, the tenant is pre-provisioned: the harness only reads
//! tokens from it with the password-realm grant.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use super::{fetch_well_known, OidcProvider, Token, TokenEndpoint};
use crate::config::settings::Auth0Settings;
use crate::errors::{Error, Result};
use crate::utils::http::api_client;

const PASSWORD_REALM_GRANT: &str = "http://auth0.com/oauth/grant-type/password-realm";
const DEFAULT_CONNECTION: &str = "Username-Password-Authentication";

#[derive(Debug)]
pub struct Auth0 {
    url: String,
    username: String,
    password: String,
    endpoint: Arc<TokenEndpoint>,
    well_known: OnceCell<Value>,
}

impl Auth0 {
    pub fn new(
        url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let url = url.into().trim_end_matches('/').to_string();
        let client = api_client(Duration::from_secs(30), false)?;
        let endpoint = TokenEndpoint::new(client, format!("{}/oauth/token", url), client_id)
            .with_secret(client_secret)
            .with_param("scope", "openid offline_access")
            .with_param("realm", DEFAULT_CONNECTION);
        Ok(Self {
            url,
            username: username.into(),
            password: password.into(),
            endpoint: Arc::new(endpoint),
            well_known: OnceCell::new(),
        })
    }

    /// Every field is required; a missing one means the tenant is not configured
    pub fn from_settings(settings: &Auth0Settings) -> Result<Self> {
        fn field<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
            value
                .as_deref()
                .ok_or_else(|| Error::skipped(format!("auth0.{} is not configured", name)))
        }
        Self::new(
            field(&settings.url, "url")?,
            field(&settings.client_id, "client_id")?,
            field(&settings.client_secret, "client_secret")?,
            field(&settings.username, "username")?,
            field(&settings.password, "password")?,
        )
    }
}

#[async_trait]
impl OidcProvider for Auth0 {
    async fn issuer_url(&self) -> Result<String> {
        // Auth0 issuers carry the trailing slash
        Ok(format!("{}/", self.url))
    }

    async fn well_known(&self) -> Result<Value> {
        self.well_known
            .get_or_try_init(|| async {
                let client = api_client(Duration::from_secs(30), false)?;
                fetch_well_known(&client, &self.url).await
            })
            .await
            .cloned()
    }

    async fn get_token(&self, username: Option<&str>, password: Option<&str>) -> Result<Token> {
        self.endpoint
            .grant(&[
                ("grant_type", PASSWORD_REALM_GRANT),
                ("username", username.unwrap_or(&self.username)),
                ("password", password.unwrap_or(&self.password)),
            ])
            .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
        self.endpoint.refresh(refresh_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oidc::tests::jwt;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn password_realm_grant_yields_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("password-realm"))
            .and(body_string_contains("realm=Username-Password-Authentication"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": jwt(json!({"iss": format!("{}/", server.uri())})),
                "refresh_token": "r"
            })))
            .mount(&server)
            .await;
        let auth0 = Auth0::new(server.uri(), "id", "secret", "user@example.com", "pw").unwrap();
        let token = auth0.get_token(None, None).await.unwrap();
        assert_eq!(token.claims().unwrap()["iss"], auth0.issuer_url().await.unwrap());
    }

    #[test]
    fn missing_settings_skip() {
        let err = Auth0::from_settings(&Auth0Settings::default()).unwrap_err();
        assert!(err.is_skip());
    }
}
