//! # Trace Queries
//!
//! Read-only client for the trace backend the components under test export
//! to. Jaeger and Tempo answer the same question with different shapes; both
//! are normalised into [`Trace`] / [`Span`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::settings::{TracingBackend, TracingSettings};
use crate::errors::{Error, Result};
use crate::utils::http::{api_client, read_json};
use crate::utils::timeout::{wait_for_condition, Wait, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub operation_name: String,
    pub service: String,
    pub tags: BTreeMap<String, Value>,
}

impl Span {
    pub fn tag(&self, key: &str) -> Option<&Value> {
        self.tags.get(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    pub trace_id: String,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn spans_named(&self, operation: &str) -> Vec<&Span> {
        self.spans
            .iter()
            .filter(|s| s.operation_name == operation)
            .collect()
    }

    pub fn span(&self, span_id: &str) -> Option<&Span> {
        self.spans.iter().find(|s| s.span_id == span_id)
    }

    /// Parent of `span` within this trace
    pub fn parent_of(&self, span: &Span) -> Option<&Span> {
        span.parent_span_id.as_deref().and_then(|id| self.span(id))
    }

    /// Distinct services that reported spans
    pub fn process_count(&self) -> usize {
        self.spans
            .iter()
            .map(|s| s.service.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone)]
pub struct TracingClient {
    client: Client,
    backend: TracingBackend,
    url: String,
}

impl TracingClient {
    pub fn new(backend: TracingBackend, query_url: &str) -> Result<Self> {
        Ok(Self {
            client: api_client(DEFAULT_TIMEOUT, true)?,
            backend,
            url: query_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_settings(settings: &TracingSettings) -> Result<Self> {
        let url = settings
            .query_url
            .as_deref()
            .ok_or_else(|| Error::config("tracing.query_url is not configured"))?;
        Self::new(settings.backend, url)
    }

    pub fn backend(&self) -> TracingBackend {
        self.backend
    }

    /// Traces of `service` whose spans carry every tag in `tags`
    pub async fn get_traces(&self, service: &str, tags: &BTreeMap<String, String>) -> Result<Vec<Trace>> {
        debug!(service, ?tags, backend = ?self.backend, "Querying traces");
        match self.backend {
            TracingBackend::Jaeger => self.jaeger_traces(service, tags).await,
            TracingBackend::Tempo => self.tempo_traces(service, tags).await,
        }
    }

    /// Services known to the backend
    pub async fn get_services(&self) -> Result<Vec<String>> {
        match self.backend {
            TracingBackend::Jaeger => {
                let response = self.client.get(format!("{}/api/services", self.url)).send().await?;
                let body: JaegerList<String> = read_json(response, "jaeger services").await?;
                Ok(body.data)
            }
            TracingBackend::Tempo => {
                let response = self
                    .client
                    .get(format!("{}/api/search/tag/service.name/values", self.url))
                    .send()
                    .await?;
                let body: Value = read_json(response, "tempo services").await?;
                Ok(body["tagValues"]
                    .as_array()
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(|v| v.as_str().or_else(|| v["value"].as_str()))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default())
            }
        }
    }

    /// Wait for a matching trace spanning at least `min_processes` services
    pub async fn wait_for_trace(
        &self,
        service: &str,
        tags: &BTreeMap<String, String>,
        min_processes: usize,
        wait: Wait,
    ) -> Option<Trace> {
        let found = tokio::sync::Mutex::new(None);
        let slot = &found;
        let satisfied = wait_for_condition(wait, "trace", || async move {
            let traces = self.get_traces(service, tags).await.unwrap_or_default();
            match traces.into_iter().find(|t| t.process_count() >= min_processes) {
                Some(trace) => {
                    *slot.lock().await = Some(trace);
                    true
                }
                None => false,
            }
        })
        .await;
        if satisfied {
            found.into_inner()
        } else {
            None
        }
    }

    async fn jaeger_traces(&self, service: &str, tags: &BTreeMap<String, String>) -> Result<Vec<Trace>> {
        let tags = serde_json::to_string(tags)?;
        let response = self
            .client
            .get(format!("{}/api/traces", self.url))
            .query(&[("service", service), ("tags", tags.as_str())])
            .send()
            .await?;
        let body: JaegerList<JaegerTrace> = read_json(response, "jaeger traces").await?;
        Ok(body.data.into_iter().map(JaegerTrace::normalise).collect())
    }

    async fn tempo_traces(&self, service: &str, tags: &BTreeMap<String, String>) -> Result<Vec<Trace>> {
        let mut query = vec![format!("service.name={}", service)];
        query.extend(tags.iter().map(|(k, v)| format!("{}={}", k, v)));
        let response = self
            .client
            .get(format!("{}/api/search", self.url))
            .query(&[("tags", query.join(" "))])
            .send()
            .await?;
        let search: TempoSearch = read_json(response, "tempo search").await?;

        let mut traces = Vec::with_capacity(search.traces.len());
        for hit in search.traces {
            let response = self
                .client
                .get(format!("{}/api/traces/{}", self.url, hit.trace_id))
                .send()
                .await?;
            let body: TempoTrace = read_json(response, "tempo trace").await?;
            traces.push(body.normalise(&hit.trace_id));
        }
        Ok(traces)
    }
}

#[derive(Deserialize)]
struct JaegerList<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JaegerTrace {
    #[serde(rename = "traceID")]
    trace_id: String,
    spans: Vec<JaegerSpan>,
    #[serde(default)]
    processes: BTreeMap<String, JaegerProcess>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JaegerSpan {
    #[serde(rename = "spanID")]
    span_id: String,
    operation_name: String,
    #[serde(default)]
    references: Vec<JaegerReference>,
    #[serde(default)]
    tags: Vec<KeyValue>,
    #[serde(rename = "processID", default)]
    process_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JaegerReference {
    ref_type: String,
    #[serde(rename = "spanID")]
    span_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JaegerProcess {
    service_name: String,
}

#[derive(Deserialize)]
struct KeyValue {
    key: String,
    value: Value,
}

impl JaegerTrace {
    fn normalise(self) -> Trace {
        let processes = self.processes;
        let spans = self
            .spans
            .into_iter()
            .map(|s| Span {
                parent_span_id: s
                    .references
                    .iter()
                    .find(|r| r.ref_type == "CHILD_OF")
                    .map(|r| r.span_id.clone()),
                service: processes
                    .get(&s.process_id)
                    .map(|p| p.service_name.clone())
                    .unwrap_or_default(),
                tags: s.tags.into_iter().map(|kv| (kv.key, kv.value)).collect(),
                span_id: s.span_id,
                operation_name: s.operation_name,
            })
            .collect();
        Trace {
            trace_id: self.trace_id,
            spans,
        }
    }
}

#[derive(Deserialize)]
struct TempoSearch {
    #[serde(default)]
    traces: Vec<TempoHit>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TempoHit {
    #[serde(rename = "traceID")]
    trace_id: String,
}

#[derive(Deserialize)]
struct TempoTrace {
    #[serde(default)]
    batches: Vec<Value>,
}

/// OTLP JSON attribute value (`{"stringValue": "x"}` etc.) as plain JSON
fn attribute_value(value: &Value) -> Value {
    value
        .as_object()
        .and_then(|o| o.values().next())
        .cloned()
        .unwrap_or(Value::Null)
}

fn attributes(list: &Value) -> BTreeMap<String, Value> {
    list.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|a| Some((a["key"].as_str()?.to_string(), attribute_value(&a["value"]))))
                .collect()
        })
        .unwrap_or_default()
}

/// OTLP JSON ids are base64; Jaeger and the rest of the harness use hex
fn hex_id(id: &str) -> String {
    let is_hex = !id.is_empty() && id.len() % 2 == 0 && id.chars().all(|c| c.is_ascii_hexdigit());
    if is_hex {
        return id.to_lowercase();
    }
    match STANDARD.decode(id) {
        Ok(bytes) => bytes.iter().map(|b| format!("{:02x}", b)).collect(),
        Err(_) => id.to_string(),
    }
}

impl TempoTrace {
    fn normalise(self, trace_id: &str) -> Trace {
        let mut spans = Vec::new();
        for batch in &self.batches {
            let service = attributes(&batch["resource"]["attributes"])
                .get("service.name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let scopes = batch
                .get("scopeSpans")
                .or_else(|| batch.get("instrumentationLibrarySpans"))
                .and_then(Value::as_array);
            for scope in scopes.into_iter().flatten() {
                for span in scope["spans"].as_array().into_iter().flatten() {
                    spans.push(Span {
                        span_id: hex_id(span["spanId"].as_str().unwrap_or_default()),
                        parent_span_id: span["parentSpanId"]
                            .as_str()
                            .filter(|p| !p.is_empty())
                            .map(hex_id),
                        operation_name: span["name"].as_str().unwrap_or_default().to_string(),
                        service: service.clone(),
                        tags: attributes(&span["attributes"]),
                    });
                }
            }
        }
        Trace {
            trace_id: trace_id.to_string(),
            spans,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_id_tag() -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        tags.insert("authorino.request_id".to_string(), "req-1".to_string());
        tags
    }

    #[tokio::test]
    async fn jaeger_spans_resolve_parents_and_services() {
        let server = MockServer::start().await;
        Mock::given(path("/api/traces"))
            .and(query_param("service", "authorino"))
            .and(query_param("tags", r#"{"authorino.request_id":"req-1"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{
                "traceID": "abc",
                "spans": [
                    {"spanID": "1", "operationName": "Check", "processID": "p1", "references": [],
                     "tags": [{"key": "authorino.request_id", "type": "string", "value": "req-1"}]},
                    {"spanID": "2", "operationName": "jwt", "processID": "p1",
                     "references": [{"refType": "CHILD_OF", "traceID": "abc", "spanID": "1"}]},
                    {"spanID": "3", "operationName": "ingress", "processID": "p2", "references": []}
                ],
                "processes": {"p1": {"serviceName": "authorino"}, "p2": {"serviceName": "gateway"}}
            }]})))
            .mount(&server)
            .await;

        let client = TracingClient::new(TracingBackend::Jaeger, &server.uri()).unwrap();
        let traces = client.get_traces("authorino", &request_id_tag()).await.unwrap();
        let trace = &traces[0];
        let jwt = trace.spans_named("jwt")[0];
        assert_eq!(trace.parent_of(jwt).unwrap().operation_name, "Check");
        assert_eq!(trace.process_count(), 2);
        assert_eq!(trace.spans_named("Check")[0].tag("authorino.request_id"), Some(&json!("req-1")));

        let found = client
            .wait_for_trace("authorino", &request_id_tag(), 2, Wait::new(Duration::from_millis(200), Duration::from_millis(20)))
            .await;
        assert_eq!(found.unwrap().trace_id, "abc");
        let missing = client
            .wait_for_trace("authorino", &request_id_tag(), 3, Wait::new(Duration::from_millis(100), Duration::from_millis(20)))
            .await;
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn tempo_search_then_fetch() {
        let server = MockServer::start().await;
        Mock::given(path("/api/search"))
            .and(query_param("tags", "service.name=authorino authorino.request_id=req-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"traces": [{"traceID": "0a0b"}]})))
            .mount(&server)
            .await;
        Mock::given(path("/api/traces/0a0b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"batches": [{
                "resource": {"attributes": [{"key": "service.name", "value": {"stringValue": "authorino"}}]},
                "scopeSpans": [{"spans": [
                    {"spanId": "AQI=", "name": "Check", "attributes": [
                        {"key": "authorino.request_id", "value": {"stringValue": "req-1"}}
                    ]},
                    {"spanId": "AwQ=", "parentSpanId": "AQI=", "name": "jwt"}
                ]}]
            }]})))
            .mount(&server)
            .await;

        let client = TracingClient::new(TracingBackend::Tempo, &server.uri()).unwrap();
        let traces = client.get_traces("authorino", &request_id_tag()).await.unwrap();
        let trace = &traces[0];
        assert_eq!(trace.trace_id, "0a0b");
        let jwt = trace.spans_named("jwt")[0];
        assert_eq!(jwt.span_id, "0304");
        assert_eq!(trace.parent_of(jwt).unwrap().span_id, "0102");
        assert_eq!(jwt.service, "authorino");
    }

    #[test]
    fn hex_ids_pass_through() {
        assert_eq!(hex_id("00ff"), "00ff");
        assert_eq!(hex_id("AP8="), "00ff");
    }
}
