//! Test HTTP client: status-code retries, classified failures, authentication.

use reqwest::{Certificate, Identity, Method};
use serde_json::Value;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::auth::Authenticator;
use super::response::{Response, ResponseBatch};
use crate::errors::transport::TransportError;
use crate::errors::{Error, Result};
use crate::utils::certificates::TlsMaterial;
use crate::utils::retry::{retry_until, RetryConfig};

/// Statuses that trigger another attempt, and how many attempts to make
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub statuses: BTreeSet<u16>,
    pub max_attempts: u32,
    pub backoff: RetryConfig,
}

impl Default for RetryPolicy {
    /// Retry 503 (gateway not programmed yet) up to 8 times
    fn default() -> Self {
        Self::on([503])
    }
}

impl RetryPolicy {
    pub fn on<I: IntoIterator<Item = u16>>(statuses: I) -> Self {
        let backoff = RetryConfig::default().with_description("http request");
        Self {
            statuses: statuses.into_iter().collect(),
            max_attempts: backoff.max_attempts,
            backoff,
        }
    }

    /// Single attempt
    pub fn none() -> Self {
        Self {
            statuses: BTreeSet::new(),
            max_attempts: 1,
            backoff: RetryConfig::default(),
        }
    }

    /// Also retry while the old behaviour (`status`) is still observed
    pub fn until_not(mut self, status: u16) -> Self {
        self.statuses.insert(status);
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether `response` warrants another attempt
    pub fn should_retry(&self, response: &Response) -> bool {
        response
            .status()
            .map(|s| self.statuses.contains(&s))
            .unwrap_or(false)
    }

    fn config(&self) -> RetryConfig {
        self.backoff.clone().with_max_attempts(self.max_attempts)
    }
}

#[derive(Debug, Clone)]
enum Body {
    Json(Value),
    Text(String),
    Form(Vec<(String, String)>),
}

/// Per-request overrides
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    query: Vec<(String, String)>,
    body: Option<Body>,
    retry: Option<RetryPolicy>,
    anonymous: bool,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(Body::Json(body));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(Body::Text(body.into()));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(Body::Form(fields));
        self
    }

    /// Replace the client's retry policy for this request
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Send without the client's authenticator
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

/// Builder for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    base_url: String,
    ca_certificates: Vec<String>,
    identity: Option<TlsMaterial>,
    resolve: Vec<(String, SocketAddr)>,
    insecure: bool,
    timeout: Duration,
    retry: RetryPolicy,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl HttpClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ca_certificates: Vec::new(),
            identity: None,
            resolve: Vec::new(),
            insecure: false,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            authenticator: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Trust an extra CA (PEM)
    pub fn ca_certificate(mut self, pem: impl Into<String>) -> Self {
        self.ca_certificates.push(pem.into());
        self
    }

    /// Present a client certificate
    pub fn identity(mut self, material: TlsMaterial) -> Self {
        self.identity = Some(material);
        self
    }

    /// Connect to `addr` whenever `host` is requested
    pub fn resolve(mut self, host: &str, addr: SocketAddr) -> Self {
        self.resolve.push((host.to_string(), addr));
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        crate::utils::install_rustls_provider();
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(self.insecure);

        for pem in &self.ca_certificates {
            let certificate = Certificate::from_pem(pem.as_bytes())
                .map_err(|e| Error::config_with_source("invalid CA certificate", Box::new(e)))?;
            builder = builder.add_root_certificate(certificate);
        }
        if let Some(material) = &self.identity {
            let pem = format!("{}\n{}", material.full_chain(), material.key);
            let identity = Identity::from_pem(pem.as_bytes())
                .map_err(|e| Error::config_with_source("invalid client identity", Box::new(e)))?;
            builder = builder.identity(identity);
        }
        for (host, addr) in &self.resolve {
            builder = builder.resolve(host, *addr);
        }

        let client = builder
            .build()
            .map_err(|e| Error::config_with_source("failed to build HTTP client", Box::new(e)))?;
        Ok(HttpClient {
            client,
            base_url: self.base_url.trim_end_matches('/').to_string(),
            retry: self.retry,
            authenticator: self.authenticator,
        })
    }
}

/// HTTP client for traffic against the system under test
///
/// Never returns transport failures as errors: they are part of the
/// [`Response`], so tests can assert on them.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl HttpClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Copy of this client using `authenticator`
    pub fn with_authenticator(&self, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator: Some(authenticator),
            ..self.clone()
        }
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub async fn get(&self, path: &str) -> Response {
        self.request(Method::GET, path, RequestOptions::default()).await
    }

    pub async fn get_with(&self, path: &str, options: RequestOptions) -> Response {
        self.request(Method::GET, path, options).await
    }

    pub async fn post(&self, path: &str, options: RequestOptions) -> Response {
        self.request(Method::POST, path, options).await
    }

    /// `count` sequential GETs
    pub async fn get_many(&self, path: &str, count: usize, options: RequestOptions) -> ResponseBatch {
        let mut responses = Vec::with_capacity(count);
        for _ in 0..count {
            responses.push(self.request(Method::GET, path, options.clone()).await);
        }
        ResponseBatch::new(responses)
    }

    /// Send with retries; a 403 refreshes the authenticator once and resends
    pub async fn request(&self, method: Method, path: &str, options: RequestOptions) -> Response {
        let response = self.send_with_retry(&method, path, &options).await;
        if response.status() != Some(403) || options.anonymous {
            return response;
        }
        let Some(authenticator) = &self.authenticator else {
            return response;
        };
        match authenticator.refresh().await {
            Ok(true) => self.send_with_retry(&method, path, &options).await,
            Ok(false) => response,
            Err(e) => {
                debug!(error = %e, "Credential refresh failed, keeping the 403");
                response
            }
        }
    }

    async fn send_with_retry(&self, method: &Method, path: &str, options: &RequestOptions) -> Response {
        let policy = options.retry.as_ref().unwrap_or(&self.retry);
        let attempted = retry_until(
            &policy.config(),
            || self.send_once(method, path, options),
            |response| !policy.should_retry(response),
        )
        .await;
        attempted.value
    }

    async fn send_once(&self, method: &Method, path: &str, options: &RequestOptions) -> Response {
        let url = self.url(path);
        let mut request = self.client.request(method.clone(), &url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !options.query.is_empty() {
            request = request.query(&options.query);
        }
        request = match &options.body {
            Some(Body::Json(value)) => request.json(value),
            Some(Body::Text(text)) => request.body(text.clone()),
            Some(Body::Form(fields)) => request.form(fields),
            None => request,
        };
        if let (Some(authenticator), false) = (&self.authenticator, options.anonymous) {
            match authenticator.credential().await {
                Ok((placement, value)) => request = placement.apply(request, &value),
                Err(e) => debug!(error = %e, "No credential available, sending without one"),
            }
        }

        match request.send().await {
            Ok(response) => {
                let response = Response::read(&url, response).await;
                trace!(%url, status = response.status_code(), "Response");
                response
            }
            Err(e) => {
                let error = TransportError::from_reqwest(&e);
                debug!(%url, kind = %error.kind, "Request failed");
                Response::failed(&url, error)
            }
        }
    }
}
