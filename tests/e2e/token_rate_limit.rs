//! TokenRateLimitPolicy counting completion tokens of an LLM simulator.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use kuadrant_testsuite::config::HarnessConfig;
use kuadrant_testsuite::fixtures::{commit_all, Blame, Marker, Scope, TestMeta};
use kuadrant_testsuite::gateway::backend::llm_sim;
use kuadrant_testsuite::gateway::backend::llm_sim::DEFAULT_MODEL;
use kuadrant_testsuite::gateway::{Exposer, GatewayRoute, Hostname, HttpRoute, KuadrantGateway};
use kuadrant_testsuite::httpx::{RequestOptions, RetryPolicy};
use kuadrant_testsuite::kubernetes::{ClusterClient, Lifecycle};
use kuadrant_testsuite::policy::token_rate_limit::token_rate_limit_policy;
use kuadrant_testsuite::policy::{Limit, TokenUsage};

use crate::common;

const TOKEN_LIMIT: u64 = 50;
const WINDOW: Duration = Duration::from_secs(30);

fn completion() -> RequestOptions {
    RequestOptions::new()
        .json(json!({
            "model": DEFAULT_MODEL,
            "messages": [{"role": "user", "content": "What is Kuadrant?"}],
            "stream": false,
            "usage": true,
        }))
        .retry(RetryPolicy::none())
}

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with Kuadrant installed"]
async fn test_token_limit_non_streaming() {
    let runner = common::runner("token_rate_limit").await.expect("Failed to start scenario");

    let meta = TestMeta::new("test_token_limit_non_streaming")
        .log_components(["limitador", "gateway"])
        .markers([Marker::Limitador]);
    runner
        .run_test(meta, |rt| async move {
            let config = rt.resolve::<HarnessConfig>("config").await?;
            let cluster = rt.resolve::<ClusterClient>("cluster").await?;
            let blame = rt.resolve::<Blame>("blame").await?;
            let label = rt.resolve::<String>("label").await?;
            let gateway = rt.resolve::<KuadrantGateway>("gateway").await?;
            let exposer = rt.resolve::<Arc<dyn Exposer>>("exposer").await?;
            let finalizers = rt.finalizers(Scope::Function).await?;

            let backend = Arc::new(llm_sim(
                &cluster,
                &blame.blame("llm-sim"),
                &label,
                &config.settings().images.llm_sim,
            ));
            let hostname = exposer.expose_hostname(&blame.blame("llm"), &*gateway).await?;
            let route = Arc::new(HttpRoute::new(
                &cluster,
                &blame.blame("llm-route"),
                &*gateway,
                common::labels(&label),
            ));
            route.add_hostname(hostname.hostname()).await?;
            route.add_backend(&*backend, "/").await?;

            let policy = Arc::new(token_rate_limit_policy(
                &cluster,
                &blame.blame("tokens"),
                &*route,
                None,
                common::labels(&label),
            ));
            policy
                .add_limit("free", vec![Limit::new(TOKEN_LIMIT, WINDOW)], Vec::new(), Vec::new())
                .await?;

            commit_all(
                &finalizers,
                &[
                    backend.clone() as Arc<dyn Lifecycle>,
                    route.clone() as Arc<dyn Lifecycle>,
                    policy.clone() as Arc<dyn Lifecycle>,
                ],
            )
            .await?;

            let client = hostname.client().build()?;
            let mut consumed = 0;
            while consumed < TOKEN_LIMIT {
                let response = client.post("/v1/chat/completions", completion()).await;
                assert_eq!(response.status_code(), 200, "{}", response.text());
                let usage = TokenUsage::from_response(&response.json::<Value>()?)
                    .expect("completion carries a usage block");
                assert!(usage.is_consistent(), "inconsistent usage {:?}", usage);
                consumed += usage.total_tokens;
            }

            let limited = client.post("/v1/chat/completions", completion()).await;
            assert_eq!(limited.status_code(), 429);

            tokio::time::sleep(WINDOW).await;
            let recovered = client.post("/v1/chat/completions", completion()).await;
            assert_eq!(recovered.status_code(), 200);
            Ok(())
        })
        .await
        .assert_passed();

    common::finish(&runner).await;
}
