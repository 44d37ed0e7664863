//! RateLimitPolicy with a fixed window on the route.

use std::sync::Arc;
use std::time::Duration;

use kuadrant_testsuite::fixtures::{commit_all, Blame, Marker, Scope, TestMeta};
use kuadrant_testsuite::gateway::HttpRoute;
use kuadrant_testsuite::httpx::{RequestOptions, RetryPolicy};
use kuadrant_testsuite::kubernetes::{ClusterClient, Lifecycle};
use kuadrant_testsuite::policy::rate_limit::rate_limit_policy;
use kuadrant_testsuite::policy::Limit;

use crate::common;

const WINDOW: Duration = Duration::from_secs(10);

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with Kuadrant installed"]
async fn test_limit_per_window() {
    let runner = common::runner("rate_limit").await.expect("Failed to start scenario");

    let meta = TestMeta::new("test_limit_per_window")
        .log_components(["limitador", "gateway"])
        .markers([Marker::Limitador]);
    runner
        .run_test(meta, |rt| async move {
            let cluster = rt.resolve::<ClusterClient>("cluster").await?;
            let blame = rt.resolve::<Blame>("blame").await?;
            let label = rt.resolve::<String>("label").await?;
            let route = rt.resolve::<HttpRoute>("route").await?;

            let policy = Arc::new(rate_limit_policy(
                &cluster,
                &blame.blame("limit"),
                &*route,
                None,
                common::labels(&label),
            ));
            policy
                .add_limit("basic", vec![Limit::new(5, WINDOW)], Vec::new(), Vec::new())
                .await?;
            let finalizers = rt.finalizers(Scope::Function).await?;
            commit_all(&finalizers, &[policy.clone() as Arc<dyn Lifecycle>]).await?;

            let client = common::client(&rt).await?;
            // Counters start with the first request that reaches the limiter
            let single = RequestOptions::new().retry(RetryPolicy::none());

            let responses = client.get_many("/get", 5, single.clone()).await;
            responses.assert_all(200);
            assert_eq!(client.get_with("/get", single.clone()).await.status_code(), 429);

            tokio::time::sleep(WINDOW).await;
            assert_eq!(client.get_with("/get", single).await.status_code(), 200);
            Ok(())
        })
        .await
        .assert_passed();

    common::finish(&runner).await;
}
