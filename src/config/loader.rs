//! Layered configuration loading.
//!
//! Sources, lowest precedence first:
//! 1. `config/settings.yaml`, `config/secrets.yaml`, `config/settings.local.yaml`
//!    (each optional); inside every file the `default` section is applied
//!    first, then the section named by `KUADRANT_ENV`
//! 2. `KUADRANT_*` environment variables, `__` separating nested keys
//!    (`KUADRANT_KEYCLOAK__URL` sets `keycloak.url`)
//!
//! `.env` files are read into the process environment beforehand.

use config::{Config, Environment, File, FileFormat};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::settings::Settings;
use crate::errors::{Error, Result};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "KUADRANT";

/// Selects the per-environment section of every settings file
pub const ENV_SELECTOR: &str = "KUADRANT_ENV";

/// Files merged in order
pub const SETTINGS_FILES: [&str; 3] = ["settings.yaml", "secrets.yaml", "settings.local.yaml"];

/// Builder for a layered settings load
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_dir: PathBuf,
    environment: Option<String>,
    use_env_vars: bool,
    load_dotenv: bool,
}

impl Default for SettingsLoader {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from("config"),
            environment: std::env::var(ENV_SELECTOR).ok().filter(|e| !e.is_empty()),
            use_env_vars: true,
            load_dotenv: true,
        }
    }
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding the settings files
    pub fn config_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Environment section to apply after `default`
    pub fn environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    /// Disable `KUADRANT_*` overrides (tests)
    pub fn without_env_vars(mut self) -> Self {
        self.use_env_vars = false;
        self
    }

    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    /// Merge all file layers into a single JSON tree
    pub fn merged_files(&self) -> Result<Value> {
        let mut merged = Value::Object(Map::new());

        for file in SETTINGS_FILES {
            let path = self.config_dir.join(file);
            if !path.exists() {
                debug!(path = %path.display(), "Settings file not present, skipping");
                continue;
            }
            let content = std::fs::read_to_string(&path).map_err(|e| {
                Error::from(e).with_context(format!("reading {}", path.display()))
            })?;
            let document: Value = serde_yaml::from_str(&content)
                .map_err(|e| Error::from(e).with_context(format!("parsing {}", path.display())))?;
            let document = lowercase_keys(document);

            if let Some(defaults) = document.get("default") {
                deep_merge(&mut merged, defaults.clone());
            }
            if let Some(env) = &self.environment {
                if let Some(section) = document.get(env.to_ascii_lowercase().as_str()) {
                    deep_merge(&mut merged, section.clone());
                }
            }
            debug!(path = %path.display(), "Merged settings file");
        }

        Ok(merged)
    }

    /// Load, merge, override, and deserialize the settings
    pub fn load(&self) -> Result<Settings> {
        if self.load_dotenv {
            if let Err(e) = dotenvy::dotenv() {
                if !e.not_found() {
                    tracing::warn!(error = %e, "Error loading .env file");
                }
            }
        }

        let merged = self.merged_files()?;
        let mut builder = Config::builder()
            .add_source(File::from_str(&serde_json::to_string(&merged)?, FileFormat::Json));

        if self.use_env_vars {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        info!(
            environment = self.environment.as_deref().unwrap_or("default"),
            project = %settings.service_protection.project,
            "Loaded harness settings"
        );
        Ok(settings)
    }
}

/// Recursively merge `overlay` into `base`; objects merge, everything else replaces
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Keys are case-insensitive; normalise to lowercase
pub fn lowercase_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), lowercase_keys(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(lowercase_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_deep_merge_overrides_leaves_and_keeps_siblings() {
        let mut base = json!({"keycloak": {"url": "a", "username": "admin"}, "x": 1});
        deep_merge(&mut base, json!({"keycloak": {"url": "b"}, "x": [1]}));
        assert_eq!(base, json!({"keycloak": {"url": "b", "username": "admin"}, "x": [1]}));
    }

    #[test]
    fn test_lowercase_keys() {
        let value = lowercase_keys(json!({"Keycloak": {"URL": "a"}}));
        assert_eq!(value, json!({"keycloak": {"url": "a"}}));
    }

    #[test]
    fn test_files_layer_in_order_with_environment() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("settings.yaml"),
            "default:\n  keycloak:\n    url: https://default\n  cluster:\n    project: p1\nstaging:\n  cluster:\n    project: staging\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("secrets.yaml"),
            "default:\n  keycloak:\n    password: s3cret\n",
        )
        .unwrap();

        let settings = SettingsLoader::new()
            .config_dir(dir.path())
            .environment(Some("staging".to_string()))
            .without_env_vars()
            .without_dotenv()
            .load()
            .unwrap();

        assert_eq!(settings.keycloak.url.as_deref(), Some("https://default"));
        assert_eq!(settings.keycloak.password.as_deref(), Some("s3cret"));
        assert_eq!(settings.cluster.project, "staging");
        assert_eq!(settings.cluster.cli_binary, "kubectl");
    }

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = tempdir().unwrap();
        let settings = SettingsLoader::new()
            .config_dir(dir.path())
            .environment(None)
            .without_env_vars()
            .without_dotenv()
            .load()
            .unwrap();
        assert_eq!(settings.tools.project, "tools");
    }

    #[test]
    fn test_invalid_yaml_is_a_configuration_failure() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("settings.yaml"), "default: [").unwrap();
        let err = SettingsLoader::new()
            .config_dir(dir.path())
            .without_env_vars()
            .without_dotenv()
            .merged_files()
            .unwrap_err();
        assert!(err.to_string().contains("settings.yaml"));
    }

    #[test]
    fn test_env_vars_override_files_with_nested_keys() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("settings.yaml"),
            "default:\n  service_protection:\n    project: from-file\n    system_project: sys-from-file\n  keycloak:\n    url: https://from-file\n",
        )
        .unwrap();

        std::env::set_var("KUADRANT_SERVICE_PROTECTION__PROJECT", "from-env");
        std::env::set_var("KUADRANT_KEYCLOAK__URL", "https://from-env");
        let loaded = SettingsLoader::new()
            .config_dir(dir.path())
            .environment(None)
            .without_dotenv()
            .load();
        std::env::remove_var("KUADRANT_SERVICE_PROTECTION__PROJECT");
        std::env::remove_var("KUADRANT_KEYCLOAK__URL");

        let settings = loaded.unwrap();
        assert_eq!(settings.service_protection.project, "from-env");
        assert_eq!(settings.service_protection.system_project, "sys-from-file");
        assert_eq!(settings.keycloak.url.as_deref(), Some("https://from-env"));
    }
}
