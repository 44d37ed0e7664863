//! Shared fixtures for the cluster scenarios.
//!
//! Every scenario module builds its own registry so blamed names carry the
//! module name; session fixtures connect to the cluster configured in
//! `config/` (plus `KUADRANT_*` overrides).

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use kuadrant_testsuite::config::HarnessConfig;
use kuadrant_testsuite::errors::{Error, Result};
use kuadrant_testsuite::fixtures::{
    commit_all, Blame, FixtureDef, FixtureRegistry, FixtureRuntime, MarkerFilter, Scope, TestRunner,
};
use kuadrant_testsuite::gateway::backend::{httpbin, ServiceBackend};
use kuadrant_testsuite::gateway::http_route::HttpRoute;
use kuadrant_testsuite::gateway::{Exposer, ExposerKind, GatewayRoute, Hostname, KuadrantGateway};
use kuadrant_testsuite::httpx::HttpClient;
use kuadrant_testsuite::kubernetes::{ClusterClient, ClusterOptions, Lifecycle};
use kuadrant_testsuite::observability::{init_logging, LogCollector};
use kuadrant_testsuite::oidc::keycloak::KeycloakOptions;
use kuadrant_testsuite::oidc::{ClientKind, Keycloak};

/// Labels every resource of a module carries
pub fn labels(label: &str) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), label.to_string())])
}

async fn connect() -> Result<HarnessConfig> {
    let config = HarnessConfig::load()?;
    init_logging(&config.settings().logging);
    let cluster = ClusterClient::connect(ClusterOptions::from(&config.settings().cluster)).await?;
    Ok(config.attach_cluster(cluster))
}

/// Namespace-bound client for `project`, taken from the session config
fn project_client(config: &HarnessConfig, project: &str) -> Result<ClusterClient> {
    config
        .cluster()
        .map(|cluster| cluster.change_project(project))
        .ok_or_else(|| Error::fixture("harness config has no cluster attached"))
}

pub fn registry(module: &str) -> FixtureRegistry {
    let module = module.to_string();
    FixtureRegistry::new()
        .with(FixtureDef::new("config", Scope::Session, |_| connect()))
        .with(
            FixtureDef::new("cluster", Scope::Session, |ctx| async move {
                let config = ctx.get::<HarnessConfig>("config")?;
                project_client(&config, &config.settings().service_protection.project)
            })
            .depends_on(["config"]),
        )
        .with(
            FixtureDef::new("cluster2", Scope::Session, |ctx| async move {
                let config = ctx.get::<HarnessConfig>("config")?;
                project_client(&config, &config.settings().service_protection.project2)
            })
            .depends_on(["config"]),
        )
        .with(FixtureDef::new("blame", Scope::Module, move |_| {
            let module = module.clone();
            async move { Ok(Blame::new(module)) }
        }))
        .with(
            FixtureDef::new("label", Scope::Module, |ctx| async move {
                Ok(ctx.get::<Blame>("blame")?.blame("label"))
            })
            .depends_on(["blame"]),
        )
        .with(
            FixtureDef::new("exposer", Scope::Module, |ctx| async move {
                let config = ctx.get::<HarnessConfig>("config")?;
                let cluster = ctx.get::<ClusterClient>("cluster")?;
                let kind = ExposerKind::detect(&cluster, config.settings().default_exposer).await?;
                let base_domain = match kind {
                    ExposerKind::LoadBalancer => String::new(),
                    _ => config.require_str("control_plane.base_domain").await?,
                };
                let exposer: Arc<dyn Exposer> = Arc::from(kind.build(&cluster, &base_domain, false));
                let handle = exposer.clone();
                ctx.add_finalizer("delete exposer", move || -> BoxFuture<'static, Result<()>> {
                    Box::pin(async move { handle.delete().await })
                });
                Ok(exposer)
            })
            .depends_on(["config", "cluster"]),
        )
        .with(
            FixtureDef::shared("backend", Scope::Module, |ctx| async move {
                let config = ctx.get::<HarnessConfig>("config")?;
                let cluster = ctx.get::<ClusterClient>("cluster")?;
                let blame = ctx.get::<Blame>("blame")?;
                let label = ctx.get::<String>("label")?;
                let backend = Arc::new(httpbin(
                    &cluster,
                    &blame.blame("httpbin"),
                    &label,
                    &config.settings().images.httpbin,
                    1,
                ));
                commit_all(ctx.finalizers(), &[backend.clone() as Arc<dyn Lifecycle>]).await?;
                Ok(backend)
            })
            .depends_on(["config", "cluster", "blame", "label"]),
        )
        .with(
            FixtureDef::shared("gateway", Scope::Module, |ctx| async move {
                let config = ctx.get::<HarnessConfig>("config")?;
                let cluster = ctx.get::<ClusterClient>("cluster")?;
                let blame = ctx.get::<Blame>("blame")?;
                let label = ctx.get::<String>("label")?;
                let exposer = ctx.get::<Arc<dyn Exposer>>("exposer")?;
                let gateway = Arc::new(KuadrantGateway::new(
                    &cluster,
                    &blame.blame("gw"),
                    &config.settings().service_protection.gateway.gateway_class,
                    &format!("*.{}", exposer.base_domain()),
                    false,
                    labels(&label),
                ));
                commit_all(ctx.finalizers(), &[gateway.clone() as Arc<dyn Lifecycle>]).await?;
                Ok(gateway)
            })
            .depends_on(["config", "cluster", "blame", "label", "exposer"]),
        )
        .with(
            FixtureDef::new("hostname", Scope::Module, |ctx| async move {
                let blame = ctx.get::<Blame>("blame")?;
                let exposer = ctx.get::<Arc<dyn Exposer>>("exposer")?;
                let gateway = ctx.get::<KuadrantGateway>("gateway")?;
                exposer.expose_hostname(&blame.blame("hostname"), &*gateway).await
            })
            .depends_on(["blame", "exposer", "gateway"]),
        )
        .with(
            FixtureDef::shared("route", Scope::Module, |ctx| async move {
                let cluster = ctx.get::<ClusterClient>("cluster")?;
                let blame = ctx.get::<Blame>("blame")?;
                let label = ctx.get::<String>("label")?;
                let gateway = ctx.get::<KuadrantGateway>("gateway")?;
                let backend = ctx.get::<ServiceBackend>("backend")?;
                let hostname = ctx.get::<Box<dyn Hostname>>("hostname")?;
                let route = Arc::new(HttpRoute::new(
                    &cluster,
                    &blame.blame("route"),
                    &*gateway,
                    labels(&label),
                ));
                route.add_hostname(hostname.hostname()).await?;
                route.add_backend(&*backend, "/").await?;
                commit_all(ctx.finalizers(), &[route.clone() as Arc<dyn Lifecycle>]).await?;
                Ok(route)
            })
            .depends_on(["cluster", "blame", "label", "gateway", "backend", "hostname"]),
        )
        .with(
            FixtureDef::new("client", Scope::Function, |ctx| async move {
                let hostname = ctx.get::<Box<dyn Hostname>>("hostname")?;
                // The route has to exist before anything is routable
                ctx.get::<HttpRoute>("route")?;
                hostname.client().build()
            })
            .depends_on(["hostname", "route"]),
        )
        .with(
            FixtureDef::shared("keycloak", Scope::Module, |ctx| async move {
                let config = ctx.get::<HarnessConfig>("config")?;
                let blame = ctx.get::<Blame>("blame")?;
                let settings = config.settings().keycloak.clone();
                let keycloak = Arc::new(Keycloak::new(KeycloakOptions {
                    server_url: config.require_str("keycloak.url").await?,
                    username: settings.username,
                    password: config.require_str("keycloak.password").await?,
                    realm: blame.blame("realm"),
                    client_id: blame.blame("client"),
                    client_kind: ClientKind::Confidential,
                    redirect_uris: Vec::new(),
                    test_username: settings.test_user.username,
                    test_password: settings.test_user.password,
                })?);
                commit_all(ctx.finalizers(), &[keycloak.clone() as Arc<dyn Lifecycle>]).await?;
                Ok(keycloak)
            })
            .depends_on(["config", "blame"]),
        )
}

/// Runner for one scenario module, with the module scope entered
pub async fn runner(module: &str) -> Result<TestRunner> {
    let runtime = FixtureRuntime::session(registry(module)).await?;
    runtime.enter(Scope::Module).await?;
    let config = runtime.resolve::<HarnessConfig>("config").await?;
    let cluster = runtime.resolve::<ClusterClient>("cluster").await?;
    let collector = LogCollector::from_settings((*cluster).clone(), config.settings());
    Ok(TestRunner::new(runtime)
        .with_collector(collector)
        .with_filter(MarkerFilter::from_env()?))
}

/// Tear down everything the runner built
pub async fn finish(runner: &TestRunner) {
    let failed = runner.runtime().exit_all().await;
    assert_eq!(failed, 0, "{} finalizers failed", failed);
}

/// Client for the module's hostname with no credentials attached
pub async fn client(runtime: &FixtureRuntime) -> Result<Arc<HttpClient>> {
    runtime.resolve::<HttpClient>("client").await
}
