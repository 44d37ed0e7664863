//! A failing scenario leaves component logs behind.

use kuadrant_testsuite::config::HarnessConfig;
use kuadrant_testsuite::errors::Error;
use kuadrant_testsuite::fixtures::{FixtureRuntime, Marker, Scope, TestMeta, TestOutcome, TestRunner};
use kuadrant_testsuite::gateway::KuadrantGateway;
use kuadrant_testsuite::kubernetes::ClusterClient;
use kuadrant_testsuite::observability::LogCollector;

use crate::common;

const COMPONENTS: [&str; 3] = ["authorino", "limitador", "gateway"];
const TEST_NAME: &str = "test_failure_collects_logs";

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with Kuadrant installed"]
async fn test_failure_collects_logs() {
    let runtime = FixtureRuntime::session(common::registry("log_collection"))
        .await
        .expect("Failed to start scenario");
    runtime.enter(Scope::Module).await.unwrap();
    let config = runtime.resolve::<HarnessConfig>("config").await.unwrap();
    let cluster = runtime.resolve::<ClusterClient>("cluster").await.unwrap();
    // Gateway pods must exist before anything fails
    runtime.resolve::<KuadrantGateway>("gateway").await.unwrap();

    let collector = LogCollector::from_settings((*cluster).clone(), config.settings());
    let layout = collector.layout().clone();
    let runner = TestRunner::new(runtime).with_collector(collector);

    let meta = TestMeta::new(TEST_NAME)
        .log_components(COMPONENTS)
        .markers([Marker::Observability]);
    let outcome = runner
        .run_test(meta, |_| async { Err(Error::fixture("deliberate failure")) })
        .await;
    assert!(matches!(outcome, TestOutcome::Failed(_)), "{:?}", outcome);

    let files: Vec<String> = std::fs::read_dir(layout.test_dir(TEST_NAME))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    for component in COMPONENTS {
        let log = files
            .iter()
            .find(|name| name.starts_with(&format!("{}-", component)) && name.ends_with(".log"))
            .unwrap_or_else(|| panic!("no {} log among {:?}", component, files));

        let content = std::fs::read_to_string(layout.test_dir(TEST_NAME).join(log)).unwrap();
        let header: Vec<&str> = content.lines().take(7).collect();
        assert_eq!(header[0], format!("# component: {}", component));
        assert!(header[1].starts_with("# pod: "));
        assert!(header[2].starts_with("# container: "));
        assert!(header[3].starts_with("# namespace: "));
        assert!(header[4].starts_with("# since: "));
        assert!(header[5].starts_with("# collected: "));
        assert_eq!(header[6], "# ---");
    }

    common::finish(&runner).await;
}
