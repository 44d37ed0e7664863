//! # Configuration Settings
//!
//! Typed view of the layered configuration. Every section has defaults so a
//! partially filled `settings.yaml` deserializes; required values without a
//! sensible default are `Option` and enforced by section validators or by
//! lazy in-cluster loaders.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::Validate;

use crate::errors::{Error, Result};

/// Root of the harness configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct Settings {
    #[validate(nested)]
    pub cluster: ClusterSettings,

    #[validate(nested)]
    pub tools: ToolsSettings,

    #[validate(nested)]
    pub service_protection: ServiceProtectionSettings,

    pub keycloak: KeycloakSettings,

    pub auth0: Auth0Settings,

    pub mockserver: MockserverSettings,

    pub tracing: TracingSettings,

    #[validate(nested)]
    pub prometheus: PrometheusSettings,

    pub control_plane: ControlPlaneSettings,

    /// How services are exposed outside the cluster
    pub default_exposer: ExposerChoice,

    /// Extra sleep after LoadBalancer readiness, in seconds
    pub slow_loadbalancers: Option<u64>,

    pub images: ImageSettings,

    #[validate(nested)]
    pub logging: LoggingSettings,

    pub artifacts: ArtifactSettings,

    /// Extra or overridden log-collection components, keyed by component name
    pub log_components: BTreeMap<String, ComponentSelectorSettings>,

    /// What a fixture does when its configuration is missing
    pub skip_or_fail: SkipOrFail,
}

impl Settings {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()?;
        Ok(())
    }

    /// Cross-field rules the validator derive cannot express
    fn validate_custom(&self) -> Result<()> {
        if self.service_protection.project == self.service_protection.project2 {
            return Err(Error::config(
                "service_protection.project and service_protection.project2 must differ",
            ));
        }

        if let Some(kind) = &self.control_plane.issuer.kind {
            if kind != "Issuer" && kind != "ClusterIssuer" {
                return Err(Error::config(format!(
                    "control_plane.issuer.kind must be Issuer or ClusterIssuer, got {}",
                    kind
                )));
            }
        }

        Ok(())
    }

    /// Settings as a JSON tree, used for dotted-key access
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Extra sleep after LoadBalancer readiness
    pub fn slow_loadbalancer_delay(&self) -> Option<Duration> {
        self.slow_loadbalancers.map(Duration::from_secs)
    }
}

/// Connection to the control plane
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ClusterSettings {
    /// Default namespace for test resources
    #[validate(length(min = 1, message = "Cluster project cannot be empty"))]
    pub project: String,

    /// API server URL override
    pub api_url: Option<String>,

    /// Bearer token override
    pub token: Option<String>,

    /// Kubeconfig file; falls back to the in-cluster/`KUBECONFIG` inference
    pub kubeconfig_path: Option<String>,

    /// kubectl-compatible binary used by `do_action`
    #[validate(length(min = 1, message = "CLI binary cannot be empty"))]
    pub cli_binary: String,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            project: "kuadrant".to_string(),
            api_url: None,
            token: None,
            kubeconfig_path: None,
            cli_binary: "kubectl".to_string(),
        }
    }
}

/// Namespace holding shared tooling (Keycloak, Jaeger, Mockserver)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ToolsSettings {
    #[validate(length(min = 1, message = "Tools project cannot be empty"))]
    pub project: String,
}

impl Default for ToolsSettings {
    fn default() -> Self {
        Self {
            project: "tools".to_string(),
        }
    }
}

/// Components under test
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServiceProtectionSettings {
    /// Namespace of the operators and their operands
    #[validate(length(min = 1, message = "System project cannot be empty"))]
    pub system_project: String,

    /// Primary test namespace
    #[validate(length(min = 1, message = "Project cannot be empty"))]
    pub project: String,

    /// Secondary namespace for cross-namespace scenarios
    #[validate(length(min = 1, message = "Project2 cannot be empty"))]
    pub project2: String,

    pub authorino: AuthorinoSettings,

    pub envoy: EnvoySettings,

    pub gateway: GatewaySettings,

    pub limitador: LimitadorSettings,
}

impl Default for ServiceProtectionSettings {
    fn default() -> Self {
        Self {
            system_project: "kuadrant-system".to_string(),
            project: "kuadrant".to_string(),
            project2: "kuadrant2".to_string(),
            authorino: AuthorinoSettings::default(),
            envoy: EnvoySettings::default(),
            gateway: GatewaySettings::default(),
            limitador: LimitadorSettings::default(),
        }
    }
}

/// Authorization service deployment and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorinoSettings {
    /// Deploy a dedicated instance per test instead of using an existing one
    pub deploy: bool,
    pub image: Option<String>,
    /// gRPC authorization endpoint of an existing instance
    pub auth_url: Option<String>,
    /// OIDC (wristband) endpoint of an existing instance
    pub oidc_url: Option<String>,
    pub metrics_service_name: Option<String>,
    pub log_level: Option<String>,
}

impl Default for AuthorinoSettings {
    fn default() -> Self {
        Self {
            deploy: true,
            image: None,
            auth_url: None,
            oidc_url: None,
            metrics_service_name: None,
            log_level: Some("debug".to_string()),
        }
    }
}

/// Envoy data plane used by the standalone Envoy gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvoySettings {
    pub image: String,
}

impl Default for EnvoySettings {
    fn default() -> Self {
        Self {
            image: "docker.io/envoyproxy/envoy:v1.31-latest".to_string(),
        }
    }
}

/// Shared Gateway-API gateway; when unset, each test creates its own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub gateway_class: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            name: None,
            namespace: None,
            gateway_class: "istio".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitadorSettings {
    pub name: String,
}

impl Default for LimitadorSettings {
    fn default() -> Self {
        Self {
            name: "limitador".to_string(),
        }
    }
}

/// Keycloak admin access
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeycloakSettings {
    /// Resolved lazily from the `keycloak` Route in the tools namespace
    pub url: Option<String>,
    pub username: String,
    /// Resolved lazily from the `credential-sso` Secret in the tools namespace
    pub password: Option<String>,
    pub test_user: TestUserSettings,
}

impl Default for KeycloakSettings {
    fn default() -> Self {
        Self {
            url: None,
            username: "admin".to_string(),
            password: None,
            test_user: TestUserSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestUserSettings {
    pub username: String,
    pub password: String,
}

impl Default for TestUserSettings {
    fn default() -> Self {
        Self {
            username: "testUser".to_string(),
            password: "testPassword".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Auth0Settings {
    pub url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MockserverSettings {
    /// Resolved lazily from the `mockserver` Route in the tools namespace
    pub url: Option<String>,
}

/// Trace backend flavour
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TracingBackend {
    #[default]
    Jaeger,
    Tempo,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TracingSettings {
    pub backend: TracingBackend,
    /// OTLP collector endpoint handed to the components under test
    pub collector_url: Option<String>,
    /// Query API; resolved lazily from the `jaeger-query` Route
    pub query_url: Option<String>,
}

/// Prometheus endpoint and polling schedule
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PrometheusSettings {
    pub url: Option<String>,

    #[validate(range(min = 1, message = "Reconcile attempts must be positive"))]
    pub reconcile_attempts: u32,

    pub reconcile_interval_secs: u64,

    #[validate(range(min = 1, message = "Scrape attempts must be positive"))]
    pub scrape_attempts: u32,

    pub scrape_interval_secs: u64,
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        Self {
            url: None,
            reconcile_attempts: 35,
            reconcile_interval_secs: 10,
            scrape_attempts: 4,
            scrape_interval_secs: 10,
        }
    }
}

/// DNS and TLS controllers
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ControlPlaneSettings {
    /// Secret holding DNS provider credentials
    pub provider_secret: Option<String>,
    /// Domain managed by the DNS provider
    pub base_domain: Option<String>,
    pub issuer: IssuerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IssuerSettings {
    pub name: String,
    pub kind: Option<String>,
}

impl Default for IssuerSettings {
    fn default() -> Self {
        Self {
            name: "kuadrant-qe-issuer".to_string(),
            kind: Some("ClusterIssuer".to_string()),
        }
    }
}

/// Exposer selection; `auto` detects OpenShift through API discovery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExposerChoice {
    #[default]
    Auto,
    Openshift,
    Kubernetes,
    Dnspolicy,
}

/// Container images for test backends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSettings {
    pub httpbin: String,
    pub mockserver: String,
    pub llm_sim: String,
    pub spicedb: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            httpbin: "quay.io/trepel/httpbin:jsmadis".to_string(),
            mockserver: "quay.io/mganisin/mockserver:latest".to_string(),
            llm_sim: "ghcr.io/llm-d/llm-d-inference-sim:v0.3.0".to_string(),
            spicedb: "quay.io/authzed/spicedb:v1.40.0".to_string(),
        }
    }
}

/// Harness log output
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingSettings {
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Failure artifact tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    pub root: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            root: "test-failures".to_string(),
        }
    }
}

/// Pod selection for one log-collection component
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ComponentSelectorSettings {
    /// Namespace; defaults to `service_protection.system_project`
    pub namespace: Option<String>,
    pub selector: String,
    pub fallback_selector: Option<String>,
}

/// What a fixture does when its configuration is missing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SkipOrFail {
    #[default]
    Skip,
    Fail,
}

impl SkipOrFail {
    /// Turn a missing-configuration error into a skip or a failure
    pub fn apply(self, error: Error) -> Error {
        match (self, error) {
            (SkipOrFail::Skip, Error::Configuration { message, .. }) => Error::skipped(message),
            (_, other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.cluster.cli_binary, "kubectl");
        assert_eq!(settings.prometheus.reconcile_attempts, 35);
        assert_eq!(settings.artifacts.root, "test-failures");
    }

    #[test]
    fn test_projects_must_differ() {
        let mut settings = Settings::default();
        settings.service_protection.project2 = settings.service_protection.project.clone();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn test_issuer_kind_is_checked() {
        let mut settings = Settings::default();
        settings.control_plane.issuer.kind = Some("Certificate".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_project_rejected_by_validator() {
        let mut settings = Settings::default();
        settings.cluster.project = String::new();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("Cluster project cannot be empty"));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let settings: Settings = serde_yaml::from_str(
            "keycloak:\n  url: https://sso.example.com\ndefault_exposer: openshift\n",
        )
        .unwrap();
        assert_eq!(settings.keycloak.url.as_deref(), Some("https://sso.example.com"));
        assert_eq!(settings.keycloak.username, "admin");
        assert_eq!(settings.default_exposer, ExposerChoice::Openshift);
    }

    #[test]
    fn test_skip_or_fail() {
        let skipped = SkipOrFail::Skip.apply(Error::config("no keycloak"));
        assert!(skipped.is_skip());
        let failed = SkipOrFail::Fail.apply(Error::config("no keycloak"));
        assert!(matches!(failed, Error::Configuration { .. }));
        let other = SkipOrFail::Skip.apply(Error::fixture("cycle"));
        assert!(matches!(other, Error::Fixture(_)));
    }
}
