//! Run one test body inside a function scope.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{info, warn, Instrument};

use super::markers::{Marker, MarkerFilter};
use super::params::Case;
use super::runtime::FixtureRuntime;
use super::scope::Scope;
use crate::errors::{Error, Result};
use crate::observability::LogCollector;

/// What a test is called, what it is marked with, and which component logs
/// to keep if it fails
#[derive(Debug, Clone, Default)]
pub struct TestMeta {
    pub name: String,
    pub log_components: Vec<String>,
    pub markers: Vec<Marker>,
    pub case: Case,
}

impl TestMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn log_components<I, S>(mut self, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_components = components.into_iter().map(Into::into).collect();
        self
    }

    pub fn markers(mut self, markers: impl IntoIterator<Item = Marker>) -> Self {
        self.markers = markers.into_iter().collect();
        self
    }

    pub fn case(mut self, case: Case) -> Self {
        self.case = case;
        self
    }

    /// Name including the case id, used for artifact directories
    pub fn full_name(&self) -> String {
        self.case.test_name(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
    Skipped(String),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    /// Panic on failure; skips only log, since the libtest harness has no
    /// runtime skip
    pub fn assert_passed(self) {
        match self {
            TestOutcome::Passed => {}
            TestOutcome::Skipped(reason) => info!(%reason, "Test skipped"),
            TestOutcome::Failed(message) => panic!("{}", message),
        }
    }
}

pub struct TestRunner {
    runtime: Arc<FixtureRuntime>,
    collector: Option<LogCollector>,
    filter: MarkerFilter,
}

impl TestRunner {
    pub fn new(runtime: Arc<FixtureRuntime>) -> Self {
        Self {
            runtime,
            collector: None,
            filter: MarkerFilter::all(),
        }
    }

    pub fn with_collector(mut self, collector: LogCollector) -> Self {
        self.collector = Some(collector);
        self
    }

    pub fn with_filter(mut self, filter: MarkerFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn runtime(&self) -> &Arc<FixtureRuntime> {
        &self.runtime
    }

    /// Run `body` in a fresh function scope
    ///
    /// Errors and panics from the body both count as failures. On failure the
    /// test's log components are collected before the function scope is torn
    /// down. `Error::Skipped` becomes [`TestOutcome::Skipped`].
    pub async fn run_test<F, Fut>(&self, meta: TestMeta, body: F) -> TestOutcome
    where
        F: FnOnce(Arc<FixtureRuntime>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !self.filter.selects(&meta.markers) {
            return TestOutcome::Skipped("deselected by markers".to_string());
        }
        let name = meta.full_name();
        let span = crate::scenario_span!(name);
        self.run_in_scope(&name, &meta, body).instrument(span).await
    }

    async fn run_in_scope<F, Fut>(&self, name: &str, meta: &TestMeta, body: F) -> TestOutcome
    where
        F: FnOnce(Arc<FixtureRuntime>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let started = Utc::now();
        self.runtime.set_case(meta.case.clone()).await;
        if let Err(e) = self.runtime.enter(Scope::Function).await {
            return TestOutcome::Failed(e.to_string());
        }

        let outcome = match AssertUnwindSafe(body(self.runtime.clone())).catch_unwind().await {
            Ok(Ok(())) => TestOutcome::Passed,
            Ok(Err(Error::Skipped(reason))) => TestOutcome::Skipped(reason),
            Ok(Err(e)) => TestOutcome::Failed(e.to_string()),
            Err(panic) => TestOutcome::Failed(panic_message(panic.as_ref())),
        };

        if let (TestOutcome::Failed(message), Some(collector)) = (&outcome, &self.collector) {
            warn!(test = name, error = %message, "Test failed, collecting logs");
            let report = collector.collect(name, started, &meta.log_components).await;
            info!(
                test = name,
                logs = report.logs.len(),
                errors = report.errors.len(),
                "Log collection finished"
            );
        }

        match self.runtime.exit(Scope::Function).await {
            Ok(0) => {}
            Ok(failed) => warn!(test = name, failed, "Some finalizers failed"),
            Err(e) => warn!(test = name, error = %e, "Could not tear down function scope"),
        }
        info!(test = name, outcome = ?outcome, "Test finished");
        outcome
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::registry::{FixtureDef, FixtureRegistry};
    use crate::kubernetes::test_cluster;
    use crate::observability::{default_components, ArtifactLayout};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Function-scoped fixture whose teardown flips `torn_down`
    async fn runner(torn_down: Arc<AtomicBool>) -> TestRunner {
        let registry = FixtureRegistry::new().with(FixtureDef::new("label", Scope::Function, move |ctx| {
            let torn_down = torn_down.clone();
            async move {
                ctx.add_finalizer("reset", move || {
                    Box::pin(async move {
                        torn_down.store(true, Ordering::SeqCst);
                        Ok(())
                    })
                });
                Ok("label".to_string())
            }
        }));
        TestRunner::new(FixtureRuntime::session(registry).await.unwrap())
    }

    #[tokio::test]
    async fn outcomes() {
        let torn_down = Arc::new(AtomicBool::new(false));
        let runner = runner(torn_down.clone()).await;

        let outcome = runner
            .run_test(TestMeta::new("passes"), |rt| async move {
                assert_eq!(*rt.resolve::<String>("label").await?, "label");
                Ok(())
            })
            .await;
        assert!(outcome.is_passed());
        assert!(torn_down.swap(false, Ordering::SeqCst));

        let outcome = runner
            .run_test(TestMeta::new("panics"), |rt| async move {
                let label = rt.resolve::<String>("label").await?;
                if !label.is_empty() {
                    panic!("boom");
                }
                Ok(())
            })
            .await;
        assert_eq!(outcome, TestOutcome::Failed("panicked: boom".to_string()));
        assert!(torn_down.load(Ordering::SeqCst));

        let outcome = runner
            .run_test(TestMeta::new("skips"), |_| async { Err::<(), _>(Error::skipped("no keycloak")) })
            .await;
        assert_eq!(outcome, TestOutcome::Skipped("no keycloak".to_string()));
        assert_eq!(runner.runtime().active_scopes().await, vec![Scope::Session]);
    }

    #[tokio::test]
    async fn deselected_tests_do_not_run() {
        let runner = runner(Arc::new(AtomicBool::new(false)))
            .await
            .with_filter(MarkerFilter::parse("not disruptive").unwrap());
        let ran = AtomicBool::new(false);
        let outcome = runner
            .run_test(
                TestMeta::new("kills_pods").markers([Marker::Disruptive]),
                |_| async {
                    ran.store(true, Ordering::SeqCst);
                    Ok(())
                },
            )
            .await;
        assert!(matches!(outcome, TestOutcome::Skipped(_)));
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failures_collect_logs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant-system/pods"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1", "kind": "PodList", "metadata": {},
                "items": [{
                    "metadata": {"name": "limitador-abc", "namespace": "kuadrant-system"},
                    "spec": {"containers": [{"name": "limitador"}]}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/kuadrant-system/pods/limitador-abc/log"))
            .respond_with(ResponseTemplate::new(200).set_body_string("counter hit\n"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let collector = LogCollector::new(
            test_cluster(&server.uri()),
            ArtifactLayout::new(dir.path(), "gw0"),
            default_components("kuadrant-system", "kuadrant"),
        );
        let runner = runner(Arc::new(AtomicBool::new(false))).await.with_collector(collector);

        let outcome = runner
            .run_test(
                TestMeta::new("test_limit").log_components(["limitador"]),
                |_| async { Err::<(), _>(Error::http("expected 429", 200)) },
            )
            .await;
        assert!(matches!(outcome, TestOutcome::Failed(_)));

        let log = dir.path().join("gw0/test_limit/limitador-limitador-abc-limitador.log");
        let content = std::fs::read_to_string(log).unwrap();
        assert!(content.starts_with("# component: limitador"));
        assert!(content.ends_with("counter hit\n"));
    }
}
