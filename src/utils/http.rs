//! Shared plumbing for the JSON APIs the harness talks to (metrics, tracing,
//! mock server, identity provider admin).

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

use crate::errors::{Error, Result};

/// Client for backend APIs; test traffic uses `httpx` instead
pub fn api_client(timeout: Duration, insecure: bool) -> Result<Client> {
    super::install_rustls_provider();
    Client::builder()
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .build()
        .map_err(|e| Error::config_with_source("failed to build HTTP client", Box::new(e)))
}

/// Pass successful responses through, turn anything else into `Error::Http`
pub async fn ensure_success(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    debug!(%status, context, "Response status");
    if status.is_success() {
        return Ok(response);
    }
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "<unable to read error>".to_string());
    trace!("Error response:\n{}", error_text);
    Err(Error::http(
        format!("{} failed: {}", context, error_text.trim()),
        status.as_u16(),
    ))
}

/// Check status and deserialize the JSON body
pub async fn read_json<T: DeserializeOwned>(response: Response, context: &str) -> Result<T> {
    let response = ensure_success(response, context).await?;
    let status = response.status().as_u16();
    let body = response.text().await?;
    trace!("Response body:\n{}", body);
    serde_json::from_str(&body).map_err(|e| Error::Serialization {
        source: e,
        context: format!("{}: unexpected body (status {})", context, status),
    })
}
