//! Responses that carry transport failures as data.

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::errors::transport::{TransportError, TransportErrorKind};
use crate::errors::{Error, Result};

/// Outcome of one test request: a status and body, or a classified failure
#[derive(Debug, Clone)]
pub struct Response {
    url: String,
    status: Option<u16>,
    headers: HeaderMap,
    body: String,
    error: Option<TransportError>,
}

impl Response {
    pub(crate) async fn read(url: &str, response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        match response.text().await {
            Ok(body) => Self {
                url: url.to_string(),
                status: Some(status),
                headers,
                body,
                error: None,
            },
            // The status line arrived, the body did not (typically a reset)
            Err(e) => Self {
                url: url.to_string(),
                status: Some(status),
                headers,
                body: String::new(),
                error: Some(TransportError::from_reqwest(&e)),
            },
        }
    }

    pub(crate) fn failed(url: &str, error: TransportError) -> Self {
        Self {
            url: url.to_string(),
            status: None,
            headers: HeaderMap::new(),
            body: String::new(),
            error: Some(error),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// HTTP status, `None` when the request never got one
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// HTTP status, `0` when the request never got one
    pub fn status_code(&self) -> u16 {
        self.status.unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body).map_err(|e| Error::Serialization {
            source: e,
            context: format!("response body of {}", self.url),
        })
    }

    pub fn error(&self) -> Option<&TransportError> {
        self.error.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    fn has_kind(&self, kind: TransportErrorKind) -> bool {
        self.error.as_ref().map(|e| e.kind == kind).unwrap_or(false)
    }

    pub fn has_dns_error(&self) -> bool {
        self.has_kind(TransportErrorKind::Dns)
    }

    /// Any server-certificate verification failure, unknown CA included
    pub fn has_cert_verify_error(&self) -> bool {
        self.has_kind(TransportErrorKind::CertificateVerify) || self.has_unknown_ca_error()
    }

    pub fn has_unknown_ca_error(&self) -> bool {
        self.has_kind(TransportErrorKind::UnknownCa)
    }

    pub fn has_cert_required_error(&self) -> bool {
        self.has_kind(TransportErrorKind::CertificateRequired)
    }

    pub fn has_connection_reset_error(&self) -> bool {
        self.has_kind(TransportErrorKind::ConnectionReset)
    }

    pub fn has_timeout_error(&self) -> bool {
        self.has_kind(TransportErrorKind::Timeout)
    }
}

/// Responses of [`HttpClient::get_many`](super::HttpClient::get_many)
#[derive(Debug, Clone, Default)]
pub struct ResponseBatch {
    responses: Vec<Response>,
}

impl ResponseBatch {
    pub fn new(responses: Vec<Response>) -> Self {
        Self { responses }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Response> {
        self.responses.iter()
    }

    pub fn last(&self) -> Option<&Response> {
        self.responses.last()
    }

    pub fn status_codes(&self) -> Vec<u16> {
        self.responses.iter().map(Response::status_code).collect()
    }

    pub fn all_have_status(&self, status: u16) -> bool {
        self.responses.iter().all(|r| r.status == Some(status))
    }

    /// Panic unless every response has `status`
    #[track_caller]
    pub fn assert_all(&self, status: u16) {
        assert!(
            self.all_have_status(status),
            "expected every response to be {}, got {:?}",
            status,
            self.status_codes()
        );
    }
}

impl IntoIterator for ResponseBatch {
    type Item = Response;
    type IntoIter = std::vec::IntoIter<Response>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_status(status: u16) -> Response {
        Response {
            url: "http://test/get".to_string(),
            status: Some(status),
            headers: HeaderMap::new(),
            body: String::new(),
            error: None,
        }
    }

    #[test]
    fn transport_failures_are_predicates() {
        let response = Response::failed(
            "https://test",
            TransportError {
                kind: TransportErrorKind::UnknownCa,
                message: "invalid peer certificate: UnknownIssuer".to_string(),
            },
        );
        assert_eq!(response.status(), None);
        assert_eq!(response.status_code(), 0);
        assert!(response.has_unknown_ca_error());
        assert!(response.has_cert_verify_error());
        assert!(!response.has_dns_error());
        assert!(!response.has_cert_required_error());
    }

    #[test]
    fn batch_assertions() {
        let batch = ResponseBatch::new(vec![with_status(200), with_status(200)]);
        batch.assert_all(200);
        assert!(!batch.all_have_status(429));
        assert_eq!(batch.status_codes(), vec![200, 200]);
    }

    #[test]
    #[should_panic(expected = "expected every response to be 200")]
    fn batch_assertion_reports_codes() {
        ResponseBatch::new(vec![with_status(200), with_status(429)]).assert_all(200);
    }
}
