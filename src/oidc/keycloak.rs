//! Keycloak identity provider.
//!
//! Every scenario that needs Keycloak gets its own realm, with one client and
//! one test user, created through the admin REST API and deleted afterwards.
//! Older Keycloak releases serve everything under `/auth/`; the admin session
//! detects that on its first call and rewrites the server URL.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use super::{fetch_well_known, OidcProvider, Token, TokenEndpoint};
use crate::errors::{Error, Result};
use crate::kubernetes::resource::Lifecycle;
use crate::utils::http::{api_client, ensure_success, read_json};

const ADMIN_CLIENT_ID: &str = "admin-cli";
const LEGACY_PREFIX: &str = "/auth";

/// Capability set of a Keycloak client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    /// Client secret, authorization code flow
    Confidential,
    /// No credentials, authorization code flow with PKCE
    Public,
    /// Client secret, client credentials flow
    Service,
}

impl ClientKind {
    fn representation(&self, client_id: &str, redirect_uris: &[String]) -> Value {
        let (public, service_accounts, standard_flow) = match self {
            ClientKind::Confidential => (false, false, true),
            ClientKind::Public => (true, false, true),
            ClientKind::Service => (false, true, false),
        };
        let mut client = json!({
            "clientId": client_id,
            "enabled": true,
            "publicClient": public,
            "serviceAccountsEnabled": service_accounts,
            "standardFlowEnabled": standard_flow,
            "directAccessGrantsEnabled": true,
            "redirectUris": redirect_uris,
        });
        if *self == ClientKind::Public {
            client["attributes"] = json!({"pkce.code.challenge.method": "S256"});
        }
        client
    }

    pub fn has_secret(&self) -> bool {
        !matches!(self, ClientKind::Public)
    }
}

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone)]
pub struct Pkce {
    verifier: String,
    challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self { verifier, challenge }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    pub fn method(&self) -> &'static str {
        "S256"
    }
}

/// Authenticated session against the master realm admin API
pub struct AdminSession {
    client: Client,
    url: String,
    username: String,
    password: String,
    server_url: OnceCell<String>,
    token: Mutex<Option<String>>,
}

impl std::fmt::Debug for AdminSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSession")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("server_url", &self.server_url.get())
            .finish_non_exhaustive()
    }
}

impl AdminSession {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: api_client(Duration::from_secs(30), true)?,
            url: url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            server_url: OnceCell::new(),
            token: Mutex::new(None),
        })
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    /// Server URL, with the legacy `/auth` prefix when this Keycloak needs it
    pub async fn server_url(&self) -> Result<&str> {
        let url = self
            .server_url
            .get_or_try_init(|| async {
                let token = self.login(&self.url).await;
                match token {
                    Ok(token) => {
                        *self.token.lock().await = Some(token);
                        Ok(self.url.clone())
                    }
                    Err(e) if e.status_code() == Some(404) => {
                        let legacy = format!("{}{}", self.url, LEGACY_PREFIX);
                        info!(url = %legacy, "Keycloak rejected admin login, switching to legacy /auth prefix");
                        let token = self.login(&legacy).await?;
                        *self.token.lock().await = Some(token);
                        Ok(legacy)
                    }
                    Err(e) => Err(e),
                }
            })
            .await?;
        Ok(url.as_str())
    }

    async fn login(&self, server_url: &str) -> Result<String> {
        let url = format!("{}/realms/master/protocol/openid-connect/token", server_url);
        debug!(%url, username = %self.username, "Logging into Keycloak admin API");
        let response = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "password"),
                ("client_id", ADMIN_CLIENT_ID),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await?;
        let body: Value = read_json(response, "keycloak admin login")
            .await
            .map_err(|e| Error::identity(e.to_string(), e.status_code()))?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::identity("admin login returned no access token", None))
    }

    async fn bearer(&self) -> Result<String> {
        let server_url = self.server_url().await?.to_string();
        let mut token = self.token.lock().await;
        match token.as_ref() {
            Some(t) => Ok(t.clone()),
            None => {
                let fresh = self.login(&server_url).await?;
                *token = Some(fresh.clone());
                Ok(fresh)
            }
        }
    }

    /// Call `/admin/realms<path>`; an expired admin token is renewed once
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/admin/realms{}", self.server_url().await?, path);
        for attempt in 0..2 {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(self.bearer().await?);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await?;
            if response.status() == StatusCode::UNAUTHORIZED && attempt == 0 {
                debug!("Keycloak admin token expired, logging in again");
                *self.token.lock().await = None;
                continue;
            }
            let context = format!("keycloak {} {}", method, path);
            return ensure_success(response, &context)
                .await
                .map_err(|e| Error::identity(e.to_string(), e.status_code()));
        }
        Err(Error::identity("keycloak admin API keeps rejecting the session", Some(401)))
    }

    async fn get_json(&self, path: &str) -> Result<Value> {
        let response = self.request(Method::GET, path, None).await?;
        Ok(response.json().await?)
    }

    /// POST and return the id from the `Location` header
    async fn create(&self, path: &str, body: &Value) -> Result<String> {
        let response = self.request(Method::POST, path, Some(body)).await?;
        Ok(response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|location| location.rsplit('/').next())
            .unwrap_or_default()
            .to_string())
    }
}

/// Keycloak realm owned by one scenario
#[derive(Debug, Clone)]
pub struct Realm {
    admin: Arc<AdminSession>,
    name: String,
}

impl Realm {
    pub async fn create(admin: Arc<AdminSession>, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        admin
            .request(
                Method::POST,
                "",
                Some(&json!({"realm": name, "enabled": true})),
            )
            .await?;
        info!(realm = %name, "Created Keycloak realm");
        Ok(Self { admin, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn issuer_url(&self) -> Result<String> {
        Ok(format!("{}/realms/{}", self.admin.server_url().await?, self.name))
    }

    pub async fn token_url(&self) -> Result<String> {
        Ok(format!("{}/protocol/openid-connect/token", self.issuer_url().await?))
    }

    fn path(&self, suffix: &str) -> String {
        format!("/{}{}", self.name, suffix)
    }

    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> Result<User> {
        let mut user = json!({
            "username": username,
            "enabled": true,
            "emailVerified": true,
            "firstName": username,
            "lastName": username,
            "credentials": [{"type": "password", "value": password, "temporary": false}],
        });
        if let Some(email) = email {
            user["email"] = json!(email);
        }
        let id = self.admin.create(&self.path("/users"), &user).await?;
        debug!(realm = %self.name, %username, %id, "Created Keycloak user");
        Ok(User {
            realm: self.clone(),
            id,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Realm role; returns its representation
    pub async fn create_role(&self, name: &str) -> Result<Value> {
        self.admin
            .request(Method::POST, &self.path("/roles"), Some(&json!({"name": name})))
            .await?;
        self.admin.get_json(&self.path(&format!("/roles/{}", name))).await
    }

    pub async fn create_client(
        &self,
        client_id: &str,
        kind: ClientKind,
        redirect_uris: &[String],
    ) -> Result<KeycloakClient> {
        let representation = kind.representation(client_id, redirect_uris);
        let id = self.admin.create(&self.path("/clients"), &representation).await?;
        let secret = if kind.has_secret() {
            let body = self
                .admin
                .get_json(&self.path(&format!("/clients/{}/client-secret", id)))
                .await?;
            body.get("value").and_then(Value::as_str).map(str::to_string)
        } else {
            None
        };
        debug!(realm = %self.name, %client_id, ?kind, "Created Keycloak client");
        Ok(KeycloakClient {
            realm: self.clone(),
            id,
            client_id: client_id.to_string(),
            kind,
            secret,
        })
    }

    /// Turn on authorization services for `client` (UMA resources live there)
    pub async fn enable_authorization(&self, client: &KeycloakClient) -> Result<()> {
        let mut representation = self
            .admin
            .get_json(&self.path(&format!("/clients/{}", client.id)))
            .await?;
        representation["authorizationServicesEnabled"] = json!(true);
        representation["serviceAccountsEnabled"] = json!(true);
        self.admin
            .request(
                Method::PUT,
                &self.path(&format!("/clients/{}", client.id)),
                Some(&representation),
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        match self.admin.request(Method::DELETE, &self.path(""), None).await {
            Ok(_) => {
                info!(realm = %self.name, "Deleted Keycloak realm");
                Ok(())
            }
            Err(e) if e.status_code() == Some(404) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// User of a realm
#[derive(Debug, Clone)]
pub struct User {
    realm: Realm,
    id: String,
    username: String,
    password: String,
}

impl User {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub async fn assign_role(&self, role: &Value) -> Result<()> {
        self.realm
            .admin
            .request(
                Method::POST,
                &self.realm.path(&format!("/users/{}/role-mappings/realm", self.id)),
                Some(&json!([role])),
            )
            .await?;
        Ok(())
    }

    /// Merge `attributes` into the user's attributes; values become lists
    pub async fn add_user_attributes(&self, attributes: &Map<String, Value>) -> Result<()> {
        let path = self.realm.path(&format!("/users/{}", self.id));
        let mut user = self.realm.admin.get_json(&path).await?;
        let mut merged = user
            .get("attributes")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        for (name, value) in attributes {
            let value = match value {
                Value::Array(_) => value.clone(),
                other => json!([other]),
            };
            merged.insert(name.clone(), value);
        }
        user["attributes"] = Value::Object(merged);
        self.realm.admin.request(Method::PUT, &path, Some(&user)).await?;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        self.realm
            .admin
            .request(Method::DELETE, &self.realm.path(&format!("/users/{}", self.id)), None)
            .await?;
        Ok(())
    }
}

/// Client of a realm
#[derive(Debug, Clone)]
pub struct KeycloakClient {
    realm: Realm,
    id: String,
    client_id: String,
    kind: ClientKind,
    secret: Option<String>,
}

impl KeycloakClient {
    /// Internal id used by the admin API
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }

    pub async fn token_endpoint(&self) -> Result<Arc<TokenEndpoint>> {
        let mut endpoint = TokenEndpoint::new(
            self.realm.admin.http().clone(),
            self.realm.token_url().await?,
            self.client_id.clone(),
        );
        if let Some(secret) = &self.secret {
            endpoint = endpoint.with_secret(secret.clone());
        }
        Ok(Arc::new(endpoint))
    }

    /// Browser authorization URL for the code flow
    pub async fn authorization_url(&self, redirect_uri: &str, pkce: Option<&Pkce>) -> Result<String> {
        let mut url = url::Url::parse(&format!(
            "{}/protocol/openid-connect/auth",
            self.realm.issuer_url().await?
        ))
        .map_err(|e| Error::config(format!("invalid Keycloak URL: {}", e)))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("response_type", "code")
                .append_pair("scope", "openid")
                .append_pair("redirect_uri", redirect_uri);
            if let Some(pkce) = pkce {
                query
                    .append_pair("code_challenge", pkce.challenge())
                    .append_pair("code_challenge_method", pkce.method());
            }
        }
        Ok(url.to_string())
    }

    /// Service-account user behind a `Service` client
    pub async fn service_account_user(&self) -> Result<Value> {
        self.realm
            .admin
            .get_json(&self.realm.path(&format!("/clients/{}/service-account-user", self.id)))
            .await
    }

    /// UMA-protected resource owned by `owner`; returns the resource id
    pub async fn create_uma_resource(&self, name: &str, uris: &[&str], owner: &str) -> Result<String> {
        let body = json!({
            "name": name,
            "uris": uris,
            "ownerManagedAccess": true,
            "owner": owner,
        });
        let response = self
            .realm
            .admin
            .request(
                Method::POST,
                &self
                    .realm
                    .path(&format!("/clients/{}/authz/resource-server/resource", self.id)),
                Some(&body),
            )
            .await?;
        let created: Value = response.json().await?;
        created
            .get("_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::identity("UMA resource created without an id", None))
    }
}

/// What a scenario's Keycloak fixture creates
#[derive(Debug, Clone)]
pub struct KeycloakOptions {
    pub server_url: String,
    pub username: String,
    pub password: String,
    pub realm: String,
    pub client_id: String,
    pub client_kind: ClientKind,
    pub redirect_uris: Vec<String>,
    pub test_username: String,
    pub test_password: String,
}

#[derive(Debug)]
struct Provisioned {
    realm: Realm,
    client: KeycloakClient,
    user: User,
    endpoint: Arc<TokenEndpoint>,
}

/// Keycloak provider: one realm, client and test user per scenario
#[derive(Debug)]
pub struct Keycloak {
    admin: Arc<AdminSession>,
    options: KeycloakOptions,
    provisioned: OnceCell<Provisioned>,
    well_known: OnceCell<Value>,
}

impl Keycloak {
    pub fn new(options: KeycloakOptions) -> Result<Self> {
        let admin = AdminSession::new(&options.server_url, &options.username, &options.password)?;
        Ok(Self {
            admin: Arc::new(admin),
            options,
            provisioned: OnceCell::new(),
            well_known: OnceCell::new(),
        })
    }

    pub fn admin(&self) -> &Arc<AdminSession> {
        &self.admin
    }

    /// Server URL after legacy-prefix detection
    pub async fn server_url(&self) -> Result<String> {
        Ok(self.admin.server_url().await?.to_string())
    }

    fn provisioned(&self) -> Result<&Provisioned> {
        self.provisioned
            .get()
            .ok_or_else(|| Error::fixture(format!("Keycloak realm {} is not committed", self.options.realm)))
    }

    pub fn realm(&self) -> Result<&Realm> {
        Ok(&self.provisioned()?.realm)
    }

    pub fn client(&self) -> Result<&KeycloakClient> {
        Ok(&self.provisioned()?.client)
    }

    pub fn user(&self) -> Result<&User> {
        Ok(&self.provisioned()?.user)
    }

    /// Client-credentials token (service clients)
    pub async fn client_credentials_token(&self) -> Result<Token> {
        self.provisioned()?.endpoint.client_credentials().await
    }

    async fn provision(&self) -> Result<Provisioned> {
        let realm = Realm::create(Arc::clone(&self.admin), &self.options.realm).await?;
        let client = realm
            .create_client(
                &self.options.client_id,
                self.options.client_kind,
                &self.options.redirect_uris,
            )
            .await?;
        let user = realm
            .create_user(&self.options.test_username, &self.options.test_password, None)
            .await?;
        let endpoint = client.token_endpoint().await?;
        Ok(Provisioned {
            realm,
            client,
            user,
            endpoint,
        })
    }
}

#[async_trait]
impl OidcProvider for Keycloak {
    async fn issuer_url(&self) -> Result<String> {
        Ok(format!("{}/realms/{}", self.admin.server_url().await?, self.options.realm))
    }

    async fn well_known(&self) -> Result<Value> {
        let issuer = self.issuer_url().await?;
        self.well_known
            .get_or_try_init(|| fetch_well_known(self.admin.http(), &issuer))
            .await
            .cloned()
    }

    async fn get_token(&self, username: Option<&str>, password: Option<&str>) -> Result<Token> {
        let username = username.unwrap_or(&self.options.test_username);
        let password = password.unwrap_or(&self.options.test_password);
        self.provisioned()?.endpoint.password(username, password).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
        self.provisioned()?.endpoint.refresh(refresh_token).await
    }
}

#[async_trait]
impl Lifecycle for Keycloak {
    fn describe(&self) -> String {
        format!("Keycloak/{}", self.options.realm)
    }

    async fn commit(&self) -> Result<()> {
        self.provisioned.get_or_try_init(|| self.provision()).await?;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match self.provisioned.get() {
            Some(provisioned) => provisioned.realm.delete().await,
            None => Ok(()),
        }
    }

    async fn wait_for_ready(&self) -> bool {
        match self.well_known().await {
            Ok(_) => true,
            Err(e) => {
                warn!(realm = %self.options.realm, error = %e, "Keycloak realm not serving discovery");
                false
            }
        }
    }
}
