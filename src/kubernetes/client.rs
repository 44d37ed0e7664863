//! Cluster client bound to one namespace ("project").
//!
//! Typed reads and writes go through the Kubernetes API (`kube`). Verbs that
//! have no API equivalent (`rollout status`, `exec`, `port-forward`) go through
//! the configured kubectl-compatible binary via [`ClusterClient::do_action`].

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Pod, Secret, Service};
use kube::api::{Api, ListParams, LogParams, Patch, PatchParams};
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::objects::route::Route;
use super::resource::{KubeObject, Resource, FIELD_MANAGER};
use crate::config::settings::ClusterSettings;
use crate::errors::{Error, Result};
use crate::utils::timeout::{with_timeout, DEFAULT_TIMEOUT};

/// Explicit connection parameters; there is no process-wide default client
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub project: String,
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub kubeconfig_path: Option<PathBuf>,
    pub cli_binary: String,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self::from(&ClusterSettings::default())
    }
}

impl From<&ClusterSettings> for ClusterOptions {
    fn from(settings: &ClusterSettings) -> Self {
        Self {
            project: settings.project.clone(),
            api_url: settings.api_url.clone(),
            token: settings.token.clone(),
            kubeconfig_path: settings.kubeconfig_path.as_ref().map(PathBuf::from),
            cli_binary: settings.cli_binary.clone(),
        }
    }
}

/// Options of a control-plane verb run through the CLI binary
#[derive(Debug, Clone)]
pub struct ActionOptions {
    /// Written to the child's stdin
    pub stdin: Option<String>,
    /// Turn a non-zero exit into `Error::ControlPlane`
    pub auto_raise: bool,
    /// Parse stdout as JSON (falling back to YAML)
    pub parse_output: bool,
    pub timeout: Duration,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            stdin: None,
            auto_raise: true,
            parse_output: false,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl ActionOptions {
    pub fn parsed() -> Self {
        Self {
            parse_output: true,
            ..Self::default()
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn no_raise(mut self) -> Self {
        self.auto_raise = false;
        self
    }
}

/// Result of a CLI verb
#[derive(Debug, Clone)]
pub struct ActionOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub parsed: Option<Value>,
}

impl ActionOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Client for one control plane in the context of one namespace
#[derive(Clone)]
pub struct ClusterClient {
    client: Client,
    options: ClusterOptions,
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("project", &self.options.project)
            .field("api_url", &self.options.api_url)
            .finish_non_exhaustive()
    }
}

impl ClusterClient {
    /// Build a client from explicit options
    pub async fn connect(options: ClusterOptions) -> Result<Self> {
        crate::utils::install_rustls_provider();

        let mut config = match &options.kubeconfig_path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::config_with_source(
                        format!("cannot read kubeconfig {}", path.display()),
                        Box::new(e),
                    )
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::config_with_source("invalid kubeconfig", Box::new(e)))?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::config_with_source("cannot infer cluster config", Box::new(e)))?,
        };

        if let Some(api_url) = &options.api_url {
            config.cluster_url = api_url.parse::<http::Uri>().map_err(|e| {
                Error::config_with_source(format!("invalid api_url {}", api_url), Box::new(e))
            })?;
        }
        if let Some(token) = &options.token {
            config.auth_info = token_auth(token)?;
        }
        config.default_namespace = options.project.clone();

        let client = Client::try_from(config).map_err(|e| Error::kube("building client", e))?;
        info!(project = %options.project, "Connected cluster client");
        Ok(Self { client, options })
    }

    /// Wrap an existing `kube::Client` (tests point this at a fake API server)
    pub fn from_client(client: Client, options: ClusterOptions) -> Self {
        Self { client, options }
    }

    pub fn kube(&self) -> &Client {
        &self.client
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    /// Current namespace
    pub fn project(&self) -> &str {
        &self.options.project
    }

    pub fn api_url(&self) -> Option<&str> {
        self.options.api_url.as_deref()
    }

    /// Copy of this client bound to another namespace; the receiver is untouched
    pub fn change_project(&self, project: impl Into<String>) -> Self {
        let mut options = self.options.clone();
        options.project = project.into();
        Self {
            client: self.client.clone(),
            options,
        }
    }

    /// Namespaced API for `K` in the current project
    pub fn api<K: KubeObject>(&self) -> Api<K> {
        Api::namespaced(self.client.clone(), &self.options.project)
    }

    /// True iff the current namespace can be read
    pub async fn connected(&self) -> bool {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        namespaces.get(&self.options.project).await.is_ok()
    }

    /// Fetch an existing object as a committed wrapper
    pub async fn fetch<K: KubeObject>(&self, name: &str) -> Result<Resource<K>> {
        let object = self.api::<K>().get(name).await.map_err(|e| {
            Error::kube(
                format!("get {}/{} in {}", K::kind(&()), name, self.project()),
                e,
            )
        })?;
        Ok(Resource::from_server(self, object))
    }

    pub async fn get_secret(&self, name: &str) -> Result<Resource<Secret>> {
        self.fetch(name).await
    }

    pub async fn get_route(&self, name: &str) -> Result<Resource<Route>> {
        self.fetch(name).await
    }

    pub async fn get_service(&self, name: &str) -> Result<Resource<Service>> {
        self.fetch(name).await
    }

    pub async fn get_deployment(&self, name: &str) -> Result<Resource<Deployment>> {
        self.fetch(name).await
    }

    /// Server-side apply of a literal YAML or JSON document
    pub async fn apply_from_string<K: KubeObject>(&self, document: &str) -> Result<Resource<K>> {
        // YAML is a superset of JSON, one parser covers both
        let mut object: K = serde_yaml::from_str(document)?;
        if object.meta().namespace.is_none() {
            object.meta_mut().namespace = Some(self.project().to_string());
        }
        let name = object.name_any();
        let namespace = object.namespace().unwrap_or_else(|| self.project().to_string());
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let applied = api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&object))
            .await
            .map_err(|e| Error::kube(format!("apply {}/{}", K::kind(&()), name), e))?;
        debug!(kind = %K::kind(&()), name = %name, "Applied document");
        Ok(Resource::from_server(self, applied))
    }

    /// Whether the API server serves `group` (e.g. `route.openshift.io`)
    pub async fn has_api_group(&self, group: &str) -> Result<bool> {
        let groups = self
            .client
            .list_api_groups()
            .await
            .map_err(|e| Error::kube("list api groups", e))?;
        Ok(groups.groups.iter().any(|g| g.name == group))
    }

    /// Pods in the current project matching a label selector
    pub async fn pods(&self, selector: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = self.api();
        let list = pods
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::kube(format!("list pods {}", selector), e))?;
        Ok(list.items)
    }

    /// Timestamped logs of one container, from `since` on when given
    pub async fn pod_logs(
        &self,
        pod: &str,
        container: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let pods: Api<Pod> = self.api();
        let params = LogParams {
            container: Some(container.to_string()),
            since_time: since,
            timestamps: true,
            ..LogParams::default()
        };
        pods.logs(pod, &params)
            .await
            .map_err(|e| Error::kube(format!("logs {}/{}", pod, container), e))
    }

    /// Run a control-plane verb through the CLI binary
    pub async fn do_action(
        &self,
        verb: &str,
        args: &[&str],
        options: ActionOptions,
    ) -> Result<ActionOutput> {
        let mut command = Command::new(&self.options.cli_binary);
        command.arg(verb).args(args).args(self.connection_args());
        if options.parse_output {
            command.args(["-o", "json"]);
        }
        command
            .stdin(if options.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.options.cli_binary, verb, ?args, "Running control-plane verb");
        let label = format!("{} {}", self.options.cli_binary, verb);
        let stdin = options.stdin.clone();
        let spawn_context = format!("spawning {}", label);

        let output = with_timeout(options.timeout, &label, async move {
            let mut child = command
                .spawn()
                .map_err(|e| Error::from(e).with_context(spawn_context))?;
            if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(input.as_bytes()).await?;
                drop(pipe);
            }
            Ok(child.wait_with_output().await?)
        })
        .await?;

        let result = ActionOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            parsed: None,
        };

        if options.auto_raise && !result.success() {
            return Err(Error::ControlPlane {
                context: format!(
                    "{} {} {} exited with {:?}: {}",
                    self.options.cli_binary,
                    verb,
                    args.join(" "),
                    result.status,
                    result.stderr.trim()
                ),
                code: None,
                reason: None,
                source: None,
            });
        }

        if options.parse_output && result.success() {
            let parsed = match serde_json::from_str(&result.stdout) {
                Ok(value) => value,
                Err(_) => serde_yaml::from_str(&result.stdout)?,
            };
            return Ok(ActionOutput {
                parsed: Some(parsed),
                ..result
            });
        }
        Ok(result)
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = vec!["--namespace".to_string(), self.options.project.clone()];
        if let Some(server) = &self.options.api_url {
            args.push("--server".to_string());
            args.push(server.clone());
        }
        if let Some(token) = &self.options.token {
            args.push("--token".to_string());
            args.push(token.clone());
        }
        if let Some(kubeconfig) = &self.options.kubeconfig_path {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        args
    }
}

/// Bearer-token credentials; the secret type lives behind serde in `kube`
fn token_auth(token: &str) -> Result<AuthInfo> {
    Ok(serde_json::from_value(serde_json::json!({ "token": token }))?)
}
