//! Two AuthConfigs claiming the same wildcard host from different namespaces.

use std::sync::Arc;

use kuadrant_testsuite::fixtures::{commit_all, Blame, Marker, Scope, TestMeta};
use kuadrant_testsuite::kubernetes::{ClusterClient, ConditionMatcher, HasConditions, Lifecycle, Readiness};
use kuadrant_testsuite::policy::authorization::{auth_config, IdentityOptions};
use kuadrant_testsuite::utils::timeout::Wait;

use crate::common;

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with Kuadrant installed"]
async fn test_wildcard_collision_across_namespaces() {
    let runner = common::runner("wildcard_hosts").await.expect("Failed to start scenario");

    let meta = TestMeta::new("test_wildcard_collision_across_namespaces")
        .log_components(["authorino"])
        .markers([Marker::Authorino]);
    runner
        .run_test(meta, |rt| async move {
            let cluster = rt.resolve::<ClusterClient>("cluster").await?;
            let cluster2 = rt.resolve::<ClusterClient>("cluster2").await?;
            let blame = rt.resolve::<Blame>("blame").await?;
            let label = rt.resolve::<String>("label").await?;
            let finalizers = rt.finalizers(Scope::Function).await?;

            let wildcard = format!("*.{}.example.com", blame.blame("wildcard"));
            let first = Arc::new(auth_config(
                &cluster,
                &blame.blame("ac-first"),
                vec![wildcard.clone()],
                common::labels(&label),
            ));
            first
                .identity()
                .add_anonymous("anonymous", IdentityOptions::default())
                .await?;
            commit_all(&finalizers, &[first.clone() as Arc<dyn Lifecycle>]).await?;

            let second = Arc::new(auth_config(
                &cluster2,
                &blame.blame("ac-second"),
                vec![wildcard],
                common::labels(&label),
            ));
            second
                .identity()
                .add_anonymous("anonymous", IdentityOptions::default())
                .await?;
            finalizers.push_delete(second.clone());
            second.commit().await?;

            let not_linked = ConditionMatcher::is_false("Ready")
                .reason("HostsNotLinked")
                .message("One or more hosts are not linked to the resource");
            let rejected = second
                .wait_until(Wait::secs(60), |config| config.has_condition(&not_linked))
                .await;
            let conditions = second.read(|config| config.conditions().to_vec()).await;
            assert!(rejected, "second AuthConfig was not rejected: {:?}", conditions);
            assert!(first.wait_until(Wait::secs(10), |config| config.is_ready()).await);
            Ok(())
        })
        .await
        .assert_passed();

    common::finish(&runner).await;
}
