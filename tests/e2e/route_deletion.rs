//! Policies react to their target HTTPRoute disappearing.

use std::sync::Arc;

use kuadrant_testsuite::fixtures::{commit_all, Blame, Marker, Scope, TestMeta};
use kuadrant_testsuite::gateway::backend::ServiceBackend;
use kuadrant_testsuite::gateway::{Exposer, GatewayRoute, Hostname, HttpRoute, KuadrantGateway};
use kuadrant_testsuite::httpx::{RequestOptions, RetryPolicy};
use kuadrant_testsuite::kubernetes::{ClusterClient, ConditionMatcher, Lifecycle};
use kuadrant_testsuite::policy::authorization::{auth_policy, IdentityOptions};
use kuadrant_testsuite::policy::{Policy, ACCEPTED};
use kuadrant_testsuite::utils::timeout::Wait;

use crate::common;

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with Kuadrant installed"]
async fn test_route_deletion_is_reconciled() {
    let runner = common::runner("route_deletion").await.expect("Failed to start scenario");

    let meta = TestMeta::new("test_route_deletion_is_reconciled")
        .log_components(["kuadrant-operator", "gateway"])
        .markers([Marker::KuadrantOnly]);
    runner
        .run_test(meta, |rt| async move {
            let cluster = rt.resolve::<ClusterClient>("cluster").await?;
            let blame = rt.resolve::<Blame>("blame").await?;
            let label = rt.resolve::<String>("label").await?;
            let gateway = rt.resolve::<KuadrantGateway>("gateway").await?;
            let backend = rt.resolve::<ServiceBackend>("backend").await?;
            let exposer = rt.resolve::<Arc<dyn Exposer>>("exposer").await?;
            let finalizers = rt.finalizers(Scope::Function).await?;

            let hostname = exposer.expose_hostname(&blame.blame("doomed"), &*gateway).await?;
            let route = Arc::new(HttpRoute::new(
                &cluster,
                &blame.blame("doomed"),
                &*gateway,
                common::labels(&label),
            ));
            route.add_hostname(hostname.hostname()).await?;
            route.add_backend(&*backend, "/").await?;

            let policy = Arc::new(auth_policy(
                &cluster,
                &blame.blame("authz"),
                &*route,
                None,
                common::labels(&label),
            ));
            policy
                .identity()
                .add_anonymous("anonymous", IdentityOptions::default())
                .await?;
            commit_all(
                &finalizers,
                &[route.clone() as Arc<dyn Lifecycle>, policy.clone() as Arc<dyn Lifecycle>],
            )
            .await?;

            let client = hostname.client().build()?;
            assert_eq!(client.get("/get").await.status_code(), 200);

            route.delete().await?;

            let orphaned = ConditionMatcher::is_false(ACCEPTED).message("not found");
            assert!(
                policy.wait_for_condition(&orphaned, Wait::secs(60)).await,
                "policy never reported its target missing: {:?}",
                policy.conditions().await
            );

            let gone = client
                .get_with("/get", RequestOptions::new().retry(RetryPolicy::default().until_not(200)))
                .await;
            assert_eq!(gone.status_code(), 404);
            Ok(())
        })
        .await
        .assert_passed();

    common::finish(&runner).await;
}
