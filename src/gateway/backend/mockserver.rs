//! MockServer backend and a client for its expectation API.
//!
//! Scenarios use it as an HTTP metadata source or callback sink: register an
//! expectation, point a policy at the returned URL, then inspect the
//! requests MockServer recorded.

use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::ServiceBackend;
use crate::errors::Result;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::deployment::DeploymentBuilder;
use crate::utils::http::{api_client, ensure_success, read_json};

pub const MOCKSERVER_PORT: i32 = 1080;

pub fn mockserver(cluster: &ClusterClient, name: &str, label: &str, image: &str) -> ServiceBackend {
    let deployment = DeploymentBuilder::new(name, image)
        .label("app", label)
        .port("http", MOCKSERVER_PORT)
        .env("MOCKSERVER_LOG_LEVEL", "INFO")
        .readiness_probe("/mockserver/status", MOCKSERVER_PORT);
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), label.to_string());
    ServiceBackend::new(cluster, deployment, MOCKSERVER_PORT, MOCKSERVER_PORT, labels)
}

/// Client for MockServer's `/mockserver/*` control API
#[derive(Debug, Clone)]
pub struct MockserverClient {
    client: Client,
    base_url: String,
}

impl MockserverClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: api_client(Duration::from_secs(30), true)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL served by the expectation with `id`
    pub fn url_for(&self, id: &str) -> String {
        format!("{}/{}", self.base_url, id)
    }

    /// Serve `body` on `/<id>`; returns the URL
    pub async fn create_expectation(
        &self,
        id: &str,
        body: &str,
        content_type: &str,
    ) -> Result<String> {
        self.create_raw_expectation(json!({
            "id": id,
            "httpRequest": {"path": format!("/{}", id)},
            "httpResponse": {
                "headers": {"Content-Type": [content_type]},
                "body": body,
            },
        }))
        .await?;
        Ok(self.url_for(id))
    }

    /// Serve `status` with an empty body on `/<id>`
    pub async fn create_status_expectation(&self, id: &str, status: u16) -> Result<String> {
        self.create_raw_expectation(json!({
            "id": id,
            "httpRequest": {"path": format!("/{}", id)},
            "httpResponse": {"statusCode": status},
        }))
        .await?;
        Ok(self.url_for(id))
    }

    /// Register an arbitrary expectation document
    pub async fn create_raw_expectation(&self, expectation: Value) -> Result<()> {
        debug!(expectation = %expectation, "Creating mockserver expectation");
        let response = self
            .client
            .put(format!("{}/mockserver/expectation", self.base_url))
            .json(&expectation)
            .send()
            .await?;
        ensure_success(response, "create expectation").await?;
        Ok(())
    }

    /// Remove expectations and recorded requests matching `/<id>`
    pub async fn clear_expectation(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/mockserver/clear", self.base_url))
            .json(&json!({"path": format!("/{}", id)}))
            .send()
            .await?;
        ensure_success(response, "clear expectation").await?;
        Ok(())
    }

    /// Requests MockServer recorded for `/<id>`
    pub async fn retrieve_requests(&self, id: &str) -> Result<Vec<Value>> {
        let response = self
            .client
            .put(format!("{}/mockserver/retrieve?type=REQUESTS&format=JSON", self.base_url))
            .json(&json!({"path": format!("/{}", id)}))
            .send()
            .await?;
        read_json(response, "retrieve requests").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn expectation_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/mockserver/expectation"))
            .and(body_partial_json(json!({
                "id": "opa-policy",
                "httpRequest": {"path": "/opa-policy"},
                "httpResponse": {"headers": {"Content-Type": ["text/plain"]}}
            })))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/mockserver/retrieve"))
            .and(query_param("type", "REQUESTS"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"method": "GET", "path": "/opa-policy"}
            ])))
            .mount(&server)
            .await;

        let client = MockserverClient::new(format!("{}/", server.uri())).unwrap();
        let url = client
            .create_expectation("opa-policy", "allow = true", "text/plain")
            .await
            .unwrap();
        assert_eq!(url, format!("{}/opa-policy", server.uri()));

        let requests = client.retrieve_requests("opa-policy").await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0]["method"], "GET");
    }

    #[tokio::test]
    async fn rejected_expectation_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("incorrect request format"))
            .mount(&server)
            .await;
        let client = MockserverClient::new(server.uri()).unwrap();
        let err = client.create_status_expectation("x", 200).await.unwrap_err();
        assert_eq!(err.status_code(), Some(400));
    }
}
