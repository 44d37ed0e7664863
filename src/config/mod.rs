//! # Configuration Management
//!
//! Layered harness configuration: YAML files and `KUADRANT_*` environment
//! overrides ([`loader`]), a typed tree with defaults ([`settings`]),
//! declarative per-section validators ([`validators`]), and values resolved
//! from in-cluster objects on first access ([`lazy`]).
//!
//! [`HarnessConfig`] ties them together: a section is validated only when it
//! is accessed, after its lazy keys have been resolved.

pub mod lazy;
pub mod loader;
pub mod settings;
pub mod validators;

pub use lazy::{default_lazy_keys, LazyKeys, LazyLoader, NamespaceSource, Projects};
pub use loader::SettingsLoader;
pub use settings::{Settings, SkipOrFail};
pub use validators::{default_validators, Validator, ValidatorSet};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use validators::{get_path, is_truthy};

/// Keys whose values never leave the process in clear text
const SECRET_KEYS: [&str; 5] = ["password", "token", "client_secret", "provider_secret", "api_key"];

/// Configuration as tests see it
#[derive(Debug)]
pub struct HarnessConfig {
    settings: Settings,
    tree: Mutex<Value>,
    validators: ValidatorSet,
    lazy: LazyKeys,
    cluster: Option<ClusterClient>,
}

impl HarnessConfig {
    /// Load from `config/` and the environment with the default validators and lazy keys
    pub fn load() -> Result<Self> {
        Self::from_settings(SettingsLoader::new().load()?)
    }

    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let tree = settings.to_value()?;
        Ok(Self {
            settings,
            tree: Mutex::new(tree),
            validators: default_validators(),
            lazy: default_lazy_keys(),
            cluster: None,
        })
    }

    /// Cluster used to resolve lazy keys; without one they stay unresolved
    pub fn attach_cluster(mut self, cluster: ClusterClient) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn with_validators(mut self, validators: ValidatorSet) -> Self {
        self.validators = validators;
        self
    }

    pub fn with_lazy_keys(mut self, lazy: LazyKeys) -> Self {
        self.lazy = lazy;
        self
    }

    /// Typed settings as loaded, without lazy values
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cluster(&self) -> Option<&ClusterClient> {
        self.cluster.as_ref()
    }

    fn projects(&self) -> Projects {
        Projects {
            tools: self.settings.tools.project.clone(),
            system: self.settings.service_protection.system_project.clone(),
        }
    }

    /// Value of a dotted key as currently known, without lazy resolution
    pub async fn get(&self, key: &str) -> Option<Value> {
        let tree = self.tree.lock().await;
        get_path(&tree, key).filter(|v| !v.is_null()).cloned()
    }

    /// Value of a dotted key, resolving a lazy loader when nothing is set
    pub async fn lookup(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.get(key).await.filter(|v| is_truthy(Some(v))) {
            return Ok(Some(value));
        }
        let Some(cluster) = &self.cluster else {
            return Ok(None);
        };
        match self.lazy.resolve(key, cluster, &self.projects()).await? {
            Some(value) => {
                set_path(&mut *self.tree.lock().await, key, value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// String value of a key that must be present
    pub async fn require_str(&self, key: &str) -> Result<String> {
        match self.lookup(key).await? {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(other) if !other.is_null() => Ok(other.to_string()),
            _ => Err(self.settings.skip_or_fail.apply(Error::config(format!("{} must be set", key)))),
        }
    }

    /// Resolve lazy keys under `prefix`, validate, and return the subtree
    ///
    /// A lazy key that fails to resolve is left unset; the section validators
    /// then decide whether that is fatal.
    pub async fn section(&self, prefix: &str) -> Result<Value> {
        let lazy_keys: Vec<String> = self.lazy.keys_under(prefix).map(str::to_string).collect();
        for key in lazy_keys {
            if let Err(e) = self.lookup(&key).await {
                debug!(key = %key, error = %e, "Lazy key unresolved");
            }
        }

        let tree = self.tree.lock().await;
        self.validators
            .validate(prefix, &tree)
            .map_err(|e| self.settings.skip_or_fail.apply(e))?;
        Ok(get_path(&tree, prefix).cloned().unwrap_or(Value::Null))
    }

    /// Validated section deserialized into its typed form
    pub async fn section_as<T: DeserializeOwned>(&self, prefix: &str) -> Result<T> {
        let value = self.section(prefix).await?;
        serde_json::from_value(value).map_err(|e| Error::Serialization {
            source: e,
            context: format!("section {}", prefix),
        })
    }

    /// Full tree with secret values masked
    pub async fn redacted(&self) -> Value {
        let mut tree = self.tree.lock().await.clone();
        redact(&mut tree);
        tree
    }
}

fn set_path(root: &mut Value, key: &str, value: Value) {
    let mut node = root;
    let segments: Vec<String> = key.split('.').map(str::to_ascii_lowercase).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    for segment in parents {
        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        node = match node.as_object_mut() {
            Some(map) => map.entry(segment.clone()).or_insert(Value::Null),
            None => return,
        };
    }
    if !node.is_object() {
        *node = Value::Object(Default::default());
    }
    if let Some(map) = node.as_object_mut() {
        map.insert(last.clone(), value);
    }
}

fn redact(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if SECRET_KEYS.contains(&key.as_str()) && !child.is_null() {
                    *child = Value::String("********".to_string());
                } else {
                    redact(child);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_with(settings: Settings) -> HarnessConfig {
        HarnessConfig::from_settings(settings).unwrap()
    }

    #[tokio::test]
    async fn section_validation_is_lazy_and_skips_by_default() {
        let config = config_with(Settings::default());
        // Nothing touched Auth0 yet: other sections are fine
        assert!(config.section("cluster").await.is_ok());

        let err = config.section("auth0").await.unwrap_err();
        assert!(err.is_skip());
        assert!(err.to_string().contains("auth0.url must be set"));
    }

    #[tokio::test]
    async fn fail_mode_surfaces_configuration_errors() {
        let mut settings = Settings::default();
        settings.skip_or_fail = SkipOrFail::Fail;
        let err = config_with(settings).section("mockserver").await.unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[tokio::test]
    async fn explicit_values_win_over_lazy_loaders() {
        let mut settings = Settings::default();
        settings.keycloak.url = Some("https://sso.example.com".to_string());
        settings.keycloak.password = Some("admin-pass".to_string());
        let config = config_with(settings);

        assert_eq!(
            config.require_str("keycloak.url").await.unwrap(),
            "https://sso.example.com"
        );
        let section = config.section("keycloak").await.unwrap();
        assert_eq!(section["username"], "admin");
        let keycloak: settings::KeycloakSettings = config.section_as("keycloak").await.unwrap();
        assert_eq!(keycloak.test_user.username, "testUser");
    }

    #[tokio::test]
    async fn redacted_masks_secrets() {
        let mut settings = Settings::default();
        settings.keycloak.password = Some("admin-pass".to_string());
        let tree = config_with(settings).redacted().await;
        assert_eq!(tree["keycloak"]["password"], "********");
        assert_eq!(tree["keycloak"]["username"], "admin");
        assert!(tree["auth0"]["client_secret"].is_null());
    }

    #[test]
    fn set_path_creates_intermediate_objects() {
        let mut root = json!({"tracing": null});
        set_path(&mut root, "tracing.query_url", json!("http://jaeger"));
        assert_eq!(root, json!({"tracing": {"query_url": "http://jaeger"}}));
    }
}
