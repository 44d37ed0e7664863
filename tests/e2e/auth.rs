//! AuthPolicy with a Keycloak OIDC identity on the route.

use std::sync::Arc;

use kuadrant_testsuite::fixtures::{commit_all, Blame, Marker, Scope, TestMeta};
use kuadrant_testsuite::gateway::HttpRoute;
use kuadrant_testsuite::httpx::{OidcAuth, RequestOptions, RetryPolicy};
use kuadrant_testsuite::kubernetes::{ClusterClient, Lifecycle};
use kuadrant_testsuite::oidc::{Keycloak, OidcProvider};
use kuadrant_testsuite::policy::authorization::{auth_policy, IdentityOptions};

use crate::common;

#[tokio::test]
#[ignore = "requires a Kubernetes cluster with Kuadrant installed"]
async fn test_keycloak_identity() {
    let runner = common::runner("auth").await.expect("Failed to start scenario");

    let meta = TestMeta::new("test_keycloak_identity")
        .log_components(["authorino", "gateway"])
        .markers([Marker::Authorino, Marker::Smoke]);
    runner
        .run_test(meta, |rt| async move {
            let cluster = rt.resolve::<ClusterClient>("cluster").await?;
            let blame = rt.resolve::<Blame>("blame").await?;
            let label = rt.resolve::<String>("label").await?;
            let route = rt.resolve::<HttpRoute>("route").await?;
            let keycloak = rt.resolve::<Keycloak>("keycloak").await?;

            let policy = Arc::new(auth_policy(
                &cluster,
                &blame.blame("authz"),
                &*route,
                None,
                common::labels(&label),
            ));
            policy
                .identity()
                .add_oidc("keycloak", &keycloak.issuer_url().await?, None, IdentityOptions::default())
                .await?;
            let finalizers = rt.finalizers(Scope::Function).await?;
            commit_all(&finalizers, &[policy.clone() as Arc<dyn Lifecycle>]).await?;

            let client = common::client(&rt).await?;

            // Enforcement reaches the data plane shortly after the policy reports it
            let anonymous = client
                .get_with("/get", RequestOptions::new().retry(RetryPolicy::default().until_not(200)))
                .await;
            assert_eq!(anonymous.status_code(), 401);

            let token = keycloak.get_token(None, None).await?;
            let authorized = client.with_authenticator(Arc::new(OidcAuth::new(token)));
            assert_eq!(authorized.get("/get").await.status_code(), 200);

            let forged = client
                .get_with("/get", RequestOptions::new().header("Authorization", "Bearer xyz"))
                .await;
            assert_eq!(forged.status_code(), 401);
            Ok(())
        })
        .await
        .assert_passed();

    common::finish(&runner).await;
}
