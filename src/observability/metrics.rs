//! # Metrics
//!
//! Client for the Prometheus HTTP API (`/api/v1`): instant queries, active
//! scrape targets, and the two polls scenarios use before asserting on
//! metrics: "the monitor's scrape pools exist" and "a scrape happened after
//! I generated traffic".

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::settings::PrometheusSettings;
use crate::errors::{Error, Result};
use crate::kubernetes::objects::monitoring::MonitorRef;
use crate::utils::http::{api_client, read_json};
use crate::utils::retry::{retry_until, RetryConfig};
use crate::utils::timeout::DEFAULT_TIMEOUT;

/// Fixed-interval polling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub attempts: u32,
    pub interval: Duration,
}

impl PollSchedule {
    /// 35 × 10 s, for freshly created monitors
    pub fn reconcile() -> Self {
        Self {
            attempts: 35,
            interval: Duration::from_secs(10),
        }
    }

    /// 4 × 10 s, a little over one default scrape interval
    pub fn scrape() -> Self {
        Self {
            attempts: 4,
            interval: Duration::from_secs(10),
        }
    }

    fn retry(&self, description: &str) -> RetryConfig {
        RetryConfig::fixed(self.attempts.max(1), self.interval).with_description(description)
    }
}

/// One series of an instant vector
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub metric: BTreeMap<String, String>,
    pub value: f64,
}

impl Sample {
    pub fn name(&self) -> Option<&str> {
        self.metric.get("__name__").map(String::as_str)
    }
}

/// Result of an instant query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
    pub samples: Vec<Sample>,
}

impl Metrics {
    /// Samples whose labels satisfy `predicate`
    pub fn filter<F>(&self, predicate: F) -> Metrics
    where
        F: Fn(&BTreeMap<String, String>) -> bool,
    {
        Metrics {
            samples: self
                .samples
                .iter()
                .filter(|s| predicate(&s.metric))
                .cloned()
                .collect(),
        }
    }

    /// Samples carrying label `name` with value `value`
    pub fn with_label(&self, name: &str, value: &str) -> Metrics {
        self.filter(|labels| labels.get(name).map(String::as_str) == Some(value))
    }

    pub fn names(&self) -> Vec<String> {
        self.samples
            .iter()
            .filter_map(|s| s.name().map(str::to_string))
            .collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.value).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// `/targets` entry
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub scrape_pool: String,
    pub scrape_url: String,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub last_scrape: Option<DateTime<Utc>>,
}

impl Target {
    /// Path part of the scrape URL
    pub fn scrape_path(&self) -> Option<String> {
        url::Url::parse(&self.scrape_url)
            .ok()
            .map(|u| u.path().to_string())
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn into_data(self, context: &str) -> Result<T> {
        match (self.status.as_str(), self.data) {
            ("success", Some(data)) => Ok(data),
            _ => Err(Error::http(
                format!(
                    "{}: {}",
                    context,
                    self.error.unwrap_or_else(|| "prometheus returned no data".to_string())
                ),
                200,
            )),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VectorData {
    result: Vec<VectorSample>,
}

#[derive(Deserialize)]
struct VectorSample {
    metric: BTreeMap<String, String>,
    value: (Value, String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetsData {
    active_targets: Vec<Target>,
}

/// `query{k="v",...}`; label values are escaped
///
/// A query that already ends in a selector gets the labels merged into it.
pub fn with_labels(query: &str, labels: &BTreeMap<String, String>) -> String {
    if labels.is_empty() {
        return query.to_string();
    }
    let selectors: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, v.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    match query.trim_end().strip_suffix('}') {
        Some(head) if head.contains('{') => {
            let head = head.trim_end();
            let separator = if head.ends_with('{') || head.ends_with(',') { "" } else { "," };
            format!("{}{}{}}}", head, separator, selectors.join(","))
        }
        _ => format!("{}{{{}}}", query, selectors.join(",")),
    }
}

#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: Client,
    url: String,
    reconcile: PollSchedule,
    scrape: PollSchedule,
}

impl PrometheusClient {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: api_client(DEFAULT_TIMEOUT, true)?,
            url: url.trim_end_matches('/').to_string(),
            reconcile: PollSchedule::reconcile(),
            scrape: PollSchedule::scrape(),
        })
    }

    /// Client for `prometheus.url`; `Error::Configuration` when unset
    pub fn from_settings(settings: &PrometheusSettings) -> Result<Self> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| Error::config("prometheus.url is not configured"))?;
        Ok(Self::new(url)?.with_schedules(
            PollSchedule {
                attempts: settings.reconcile_attempts,
                interval: Duration::from_secs(settings.reconcile_interval_secs),
            },
            PollSchedule {
                attempts: settings.scrape_attempts,
                interval: Duration::from_secs(settings.scrape_interval_secs),
            },
        ))
    }

    pub fn with_schedules(mut self, reconcile: PollSchedule, scrape: PollSchedule) -> Self {
        self.reconcile = reconcile;
        self.scrape = scrape;
        self
    }

    /// Instant query, optionally narrowed by exact label matches
    pub async fn get_metrics(&self, query: &str, labels: Option<&BTreeMap<String, String>>) -> Result<Metrics> {
        let query = match labels {
            Some(labels) => with_labels(query, labels),
            None => query.to_string(),
        };
        debug!(%query, "Querying prometheus");
        let response = self
            .client
            .get(format!("{}/api/v1/query", self.url))
            .query(&[("query", query.as_str())])
            .send()
            .await?;
        let data = read_json::<ApiResponse<VectorData>>(response, "prometheus query")
            .await?
            .into_data("prometheus query")?;
        let samples = data
            .result
            .into_iter()
            .map(|s| Sample {
                metric: s.metric,
                value: s.value.1.parse().unwrap_or(f64::NAN),
            })
            .collect();
        Ok(Metrics { samples })
    }

    pub async fn get_active_targets(&self) -> Result<Vec<Target>> {
        let response = self
            .client
            .get(format!("{}/api/v1/targets", self.url))
            .query(&[("state", "active")])
            .send()
            .await?;
        Ok(read_json::<ApiResponse<TargetsData>>(response, "prometheus targets")
            .await?
            .into_data("prometheus targets")?
            .active_targets)
    }

    /// Targets, or none when Prometheus is unreachable mid-poll
    async fn targets_or_empty(&self) -> Vec<Target> {
        match self.get_active_targets().await {
            Ok(targets) => targets,
            Err(e) => {
                warn!(error = %e, "Failed to list prometheus targets");
                Vec::new()
            }
        }
    }

    /// All scrape pools of `monitor` are among the active targets
    pub async fn is_reconciled(&self, monitor: &MonitorRef) -> bool {
        let expected = monitor.scrape_pools();
        let config = self.reconcile.retry("monitor reconciliation");
        let outcome = retry_until(
            &config,
            || self.targets_or_empty(),
            |targets| {
                expected
                    .iter()
                    .all(|pool| targets.iter().any(|t| &t.scrape_pool == pool))
            },
        )
        .await;
        info!(
            monitor = %monitor.name,
            attempts = outcome.attempts,
            reconciled = outcome.satisfied,
            "Checked monitor scrape pools"
        );
        outcome.satisfied
    }

    /// Some target of `monitor` scraping `path` did so after this call
    pub async fn wait_for_scrape(&self, monitor: &MonitorRef, path: &str) -> bool {
        let call_time = Utc::now();
        let config = self.scrape.retry("metrics scrape");
        let outcome = retry_until(
            &config,
            || self.targets_or_empty(),
            |targets| scraped_since(targets, monitor, path, call_time),
        )
        .await;
        outcome.satisfied
    }
}

fn scraped_since(targets: &[Target], monitor: &MonitorRef, path: &str, since: DateTime<Utc>) -> bool {
    targets.iter().any(|t| {
        monitor.owns_pool(&t.scrape_pool)
            && t.scrape_path().as_deref() == Some(path)
            && t.last_scrape.map(|last| last > since).unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn monitor() -> MonitorRef {
        MonitorRef {
            pool_prefix: "serviceMonitor",
            namespace: "kuadrant".to_string(),
            name: "authorino".to_string(),
            endpoints: 2,
        }
    }

    fn fast() -> PollSchedule {
        PollSchedule {
            attempts: 3,
            interval: Duration::from_millis(10),
        }
    }

    fn target(pool: &str, url: &str, last_scrape: &str) -> Value {
        json!({
            "scrapePool": pool,
            "scrapeUrl": url,
            "health": "up",
            "labels": {"job": "authorino"},
            "lastScrape": last_scrape
        })
    }

    #[test]
    fn label_selectors_are_appended_and_escaped() {
        let mut labels = BTreeMap::new();
        labels.insert("service".to_string(), "authorino".to_string());
        labels.insert("path".to_string(), "a\"b".to_string());
        assert_eq!(
            with_labels("auth_server_response_status", &labels),
            r#"auth_server_response_status{path="a\"b",service="authorino"}"#
        );
        assert_eq!(with_labels("up", &BTreeMap::new()), "up");
    }

    #[test]
    fn labels_merge_into_an_existing_selector() {
        let mut labels = BTreeMap::new();
        labels.insert("service".to_string(), "authorino".to_string());
        assert_eq!(
            with_labels(r#"authorized_calls{namespace="x"}"#, &labels),
            r#"authorized_calls{namespace="x",service="authorino"}"#
        );
        assert_eq!(
            with_labels("authorized_calls{}", &labels),
            r#"authorized_calls{service="authorino"}"#
        );
    }

    #[tokio::test]
    async fn instant_query_parses_vector() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .and(query_param("query", r#"limitador_up{namespace="kuadrant"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"resultType": "vector", "result": [
                    {"metric": {"__name__": "limitador_up", "pod": "a"}, "value": [1700000000.0, "1"]},
                    {"metric": {"__name__": "limitador_up", "pod": "b"}, "value": [1700000000.0, "0"]}
                ]}
            })))
            .mount(&server)
            .await;

        let client = PrometheusClient::new(&server.uri()).unwrap();
        let mut labels = BTreeMap::new();
        labels.insert("namespace".to_string(), "kuadrant".to_string());
        let metrics = client.get_metrics("limitador_up", Some(&labels)).await.unwrap();
        assert_eq!(metrics.names(), vec!["limitador_up", "limitador_up"]);
        assert_eq!(metrics.values(), vec![1.0, 0.0]);
        assert_eq!(metrics.with_label("pod", "b").values(), vec![0.0]);
    }

    #[tokio::test]
    async fn reconciled_when_every_pool_is_active() {
        let server = MockServer::start().await;
        Mock::given(path("/api/v1/targets"))
            .and(query_param("state", "active"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "success",
                "data": {"activeTargets": [
                    target("serviceMonitor/kuadrant/authorino/0", "http://10.0.0.1:8080/metrics", "2020-01-01T00:00:00Z"),
                    target("serviceMonitor/kuadrant/authorino/1", "http://10.0.0.1:8080/server-metrics", "2020-01-01T00:00:00Z")
                ]}
            })))
            .mount(&server)
            .await;

        let client = PrometheusClient::new(&server.uri()).unwrap().with_schedules(fast(), fast());
        assert!(client.is_reconciled(&monitor()).await);

        let three = MonitorRef {
            endpoints: 3,
            ..monitor()
        };
        assert!(!client.is_reconciled(&three).await);
        // scrapes from 2020 are older than the call
        assert!(!client.wait_for_scrape(&monitor(), "/metrics").await);
    }

    #[test]
    fn scrape_must_be_newer_than_call_and_match_path() {
        let since: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let targets: Vec<Target> = serde_json::from_value(json!([
            target("serviceMonitor/kuadrant/authorino/0", "http://10.0.0.1:8080/metrics", "2024-05-01T10:00:05Z"),
            target("serviceMonitor/kuadrant/other/0", "http://10.0.0.2:8080/server-metrics", "2024-05-01T10:00:05Z")
        ]))
        .unwrap();
        assert!(scraped_since(&targets, &monitor(), "/metrics", since));
        assert!(!scraped_since(&targets, &monitor(), "/server-metrics", since));
        let later: DateTime<Utc> = "2024-05-01T11:00:00Z".parse().unwrap();
        assert!(!scraped_since(&targets, &monitor(), "/metrics", later));
    }

    #[test]
    fn missing_url_is_a_configuration_error() {
        let error = PrometheusClient::from_settings(&PrometheusSettings::default()).unwrap_err();
        assert!(matches!(error, Error::Configuration { .. }));
    }
}
