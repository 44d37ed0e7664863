//! Values synthesised from in-cluster state on first access.
//!
//! A key without an explicit value in the files or environment can be backed
//! by a [`LazyLoader`]: a Route whose URL becomes the value, or a Secret key
//! whose decoded content becomes the value. Resolution happens once; later
//! lookups hit the cache.

use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::route::Route;

/// Where a loader looks for its object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceSource {
    /// `tools.project`
    Tools,
    /// `service_protection.system_project`
    System,
    Named(String),
}

impl NamespaceSource {
    fn resolve<'a>(&'a self, projects: &'a Projects) -> &'a str {
        match self {
            NamespaceSource::Tools => &projects.tools,
            NamespaceSource::System => &projects.system,
            NamespaceSource::Named(name) => name,
        }
    }
}

/// Namespaces loaders may refer to symbolically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projects {
    pub tools: String,
    pub system: String,
}

/// How one lazy key is computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LazyLoader {
    /// URL of a Route; `scheme` overrides the TLS-derived scheme
    RouteUrl {
        namespace: NamespaceSource,
        name: String,
        scheme: Option<String>,
    },
    /// Decoded value of one Secret key
    SecretValue {
        namespace: NamespaceSource,
        name: String,
        key: String,
    },
}

impl LazyLoader {
    pub fn route_url(namespace: NamespaceSource, name: impl Into<String>) -> Self {
        LazyLoader::RouteUrl {
            namespace,
            name: name.into(),
            scheme: None,
        }
    }

    pub fn secret_value(
        namespace: NamespaceSource,
        name: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        LazyLoader::SecretValue {
            namespace,
            name: name.into(),
            key: key.into(),
        }
    }

    /// Compute the value from the cluster
    pub async fn resolve(&self, cluster: &ClusterClient, projects: &Projects) -> Result<Value> {
        match self {
            LazyLoader::RouteUrl {
                namespace,
                name,
                scheme,
            } => {
                let namespace = namespace.resolve(projects);
                let route = cluster
                    .change_project(namespace)
                    .fetch::<Route>(name)
                    .await?;
                let url = route
                    .read(|r| match scheme {
                        Some(scheme) => r.hostname().map(|host| format!("{}://{}", scheme, host)),
                        None => r.url(),
                    })
                    .await
                    .ok_or_else(|| {
                        Error::config(format!("route {}/{} has no host", namespace, name))
                    })?;
                Ok(Value::String(url))
            }
            LazyLoader::SecretValue {
                namespace,
                name,
                key,
            } => {
                let namespace = namespace.resolve(projects);
                let secret = cluster.change_project(namespace).get_secret(name).await?;
                let value = secret.value(key).await?.ok_or_else(|| {
                    Error::config(format!("secret {}/{} has no key {}", namespace, name, key))
                })?;
                Ok(Value::String(value))
            }
        }
    }
}

/// Registered lazy keys and their resolved values
#[derive(Debug, Default)]
pub struct LazyKeys {
    loaders: BTreeMap<String, LazyLoader>,
    cache: Mutex<BTreeMap<String, Value>>,
}

impl LazyKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, loader: LazyLoader) -> &mut Self {
        self.loaders.insert(key.into().to_ascii_lowercase(), loader);
        self
    }

    pub fn loader(&self, key: &str) -> Option<&LazyLoader> {
        self.loaders.get(&key.to_ascii_lowercase())
    }

    /// Lazy keys equal to or nested under `prefix`
    pub fn keys_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = prefix.trim_matches('.').to_ascii_lowercase();
        self.loaders.keys().map(String::as_str).filter(move |key| {
            prefix.is_empty() || *key == prefix || key.starts_with(&format!("{}.", prefix))
        })
    }

    /// Cached value, or resolve through the cluster and cache it
    pub async fn resolve(
        &self,
        key: &str,
        cluster: &ClusterClient,
        projects: &Projects,
    ) -> Result<Option<Value>> {
        let key = key.to_ascii_lowercase();
        let Some(loader) = self.loaders.get(&key) else {
            return Ok(None);
        };

        let mut cache = self.cache.lock().await;
        if let Some(value) = cache.get(&key) {
            debug!(key = %key, "Lazy key served from cache");
            return Ok(Some(value.clone()));
        }
        let value = loader
            .resolve(cluster, projects)
            .await
            .map_err(|e| e.with_context(format!("resolving {}", key)))?;
        info!(key = %key, "Resolved lazy configuration key");
        cache.insert(key, value.clone());
        Ok(Some(value))
    }
}

/// Keys backed by in-cluster objects out of the box
pub fn default_lazy_keys() -> LazyKeys {
    let mut keys = LazyKeys::new();
    keys.register(
        "keycloak.url",
        LazyLoader::route_url(NamespaceSource::Tools, "keycloak"),
    )
    .register(
        "keycloak.password",
        LazyLoader::secret_value(NamespaceSource::Tools, "credential-sso", "ADMIN_PASSWORD"),
    )
    .register(
        "tracing.query_url",
        LazyLoader::route_url(NamespaceSource::Tools, "jaeger-query"),
    )
    .register(
        "mockserver.url",
        LazyLoader::route_url(NamespaceSource::Tools, "mockserver"),
    );
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn projects() -> Projects {
        Projects {
            tools: "tools".to_string(),
            system: "kuadrant-system".to_string(),
        }
    }

    fn cluster(server: &MockServer) -> ClusterClient {
        crate::kubernetes::test_cluster(&server.uri())
    }

    #[tokio::test]
    async fn route_url_is_resolved_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/apis/route.openshift.io/v1/namespaces/tools/routes/keycloak"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "route.openshift.io/v1",
                "kind": "Route",
                "metadata": {"name": "keycloak", "namespace": "tools"},
                "spec": {
                    "host": "keycloak-tools.apps.example.com",
                    "to": {"kind": "Service", "name": "keycloak"},
                    "tls": {"termination": "edge"}
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let keys = default_lazy_keys();
        let cluster = cluster(&server);
        for _ in 0..2 {
            let value = keys.resolve("Keycloak.URL", &cluster, &projects()).await.unwrap();
            assert_eq!(value, Some(json!("https://keycloak-tools.apps.example.com")));
        }
    }

    #[tokio::test]
    async fn secret_value_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/tools/secrets/credential-sso"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"name": "credential-sso", "namespace": "tools"},
                "data": {"ADMIN_PASSWORD": "aHVudGVyMg=="}
            })))
            .mount(&server)
            .await;

        let value = default_lazy_keys()
            .resolve("keycloak.password", &cluster(&server), &projects())
            .await
            .unwrap();
        assert_eq!(value, Some(json!("hunter2")));
    }

    #[tokio::test]
    async fn unknown_keys_resolve_to_none() {
        let server = MockServer::start().await;
        let value = default_lazy_keys()
            .resolve("auth0.url", &cluster(&server), &projects())
            .await
            .unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn keys_under_prefix() {
        let keys = default_lazy_keys();
        let keycloak: Vec<_> = keys.keys_under("keycloak").collect();
        assert_eq!(keycloak, vec!["keycloak.password", "keycloak.url"]);
        assert_eq!(keys.keys_under("").count(), 4);
    }
}
