//! Resource model: one generic wrapper for every namespaced object.
//!
//! A [`Resource`] holds a local copy of the object and a `committed` flag.
//! All spec mutations go through [`Resource::modify`]: uncommitted objects are
//! mutated locally, committed ones through a read-modify-write round trip
//! that retries on optimistic-concurrency conflicts.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::client::ClusterClient;
use crate::errors::{Error, Result};
use crate::utils::timeout::{Wait, DEFAULT_TIMEOUT};

/// Field manager for server-side apply
pub const FIELD_MANAGER: &str = "kuadrant-testsuite";

/// Annotation written by `create --save-config`
pub const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Retries of `modify_and_apply` after the first attempt
pub const DEFAULT_CONFLICT_RETRIES: u32 = 2;

/// Any namespaced object the harness can manage
pub trait KubeObject:
    kube::Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> KubeObject for T where
    T: kube::Resource<DynamicType = (), Scope = kube::core::NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Consecutive explicit failures tolerated by readiness waits
pub const MAX_TOLERATED_FAILURES: u32 = 5;

/// Readiness of an object as observed after a refresh
pub trait Readiness {
    fn is_ready(&self) -> bool;

    /// Explicitly reported as failed (e.g. `Enforced=False`), not merely pending
    fn has_failed(&self) -> bool {
        false
    }
}

/// Capability set shared by resources, gateways, backends, and policies
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// `Kind/namespace/name`, for logs and finalizer names
    fn describe(&self) -> String;

    async fn commit(&self) -> Result<()>;

    /// Idempotent: deleting something already gone succeeds
    async fn delete(&self) -> Result<()>;

    /// Bounded wait; `false` on timeout
    async fn wait_for_ready(&self) -> bool;
}

/// Wrapper over one object of kind `K`
pub struct Resource<K: KubeObject> {
    cluster: ClusterClient,
    name: String,
    namespace: String,
    object: RwLock<K>,
    committed: AtomicBool,
    delete_timeout: Duration,
    ready_wait: Wait,
    settle_delay: Option<Duration>,
}

impl<K: KubeObject> Debug for Resource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("kind", &K::kind(&()))
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("committed", &self.is_committed())
            .finish()
    }
}

impl<K: KubeObject> Resource<K> {
    /// Uncommitted wrapper; the namespace defaults to the client's project
    pub fn new(cluster: &ClusterClient, mut object: K) -> Self {
        let namespace = object
            .namespace()
            .unwrap_or_else(|| cluster.project().to_string());
        object.meta_mut().namespace = Some(namespace.clone());
        let name = object.name_any();
        Self {
            cluster: cluster.change_project(namespace.clone()),
            name,
            namespace,
            object: RwLock::new(object),
            committed: AtomicBool::new(false),
            delete_timeout: DEFAULT_TIMEOUT,
            ready_wait: Wait::default(),
            settle_delay: None,
        }
    }

    /// Wrapper around an object just read from the server
    pub fn from_server(cluster: &ClusterClient, object: K) -> Self {
        let resource = Self::new(cluster, object);
        resource.committed.store(true, Ordering::SeqCst);
        resource
    }

    /// Deadline for `delete` to observe the object gone
    pub fn with_delete_timeout(mut self, timeout: Duration) -> Self {
        self.delete_timeout = timeout;
        self
    }

    /// Wait used by `wait_for_ready`
    pub fn with_ready_wait(mut self, wait: Wait) -> Self {
        self.ready_wait = wait;
        self
    }

    /// Extra sleep after readiness (slow load balancers)
    pub fn with_settle_delay(mut self, delay: Option<Duration>) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn kind() -> String {
        K::kind(&()).to_string()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Client bound to this object's namespace
    pub fn cluster(&self) -> &ClusterClient {
        &self.cluster
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn api(&self) -> Api<K> {
        Api::namespaced(self.cluster.kube().clone(), &self.namespace)
    }

    /// Clone of the local copy
    pub async fn snapshot(&self) -> K {
        self.object.read().await.clone()
    }

    /// Read a projection of the local copy without cloning it
    pub async fn read<R>(&self, f: impl FnOnce(&K) -> R) -> R {
        f(&*self.object.read().await)
    }

    /// Local copy as JSON, for dict-style access
    pub async fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(&*self.object.read().await)?)
    }

    async fn store(&self, object: K) {
        *self.object.write().await = object;
    }

    /// Server-create with save-config semantics
    pub async fn commit(&self) -> Result<()> {
        let mut object = self.snapshot().await;
        object.meta_mut().resource_version = None;
        let applied = serde_json::to_string(&object)?;
        object
            .annotations_mut()
            .insert(LAST_APPLIED_ANNOTATION.to_string(), applied);

        let created = self
            .api()
            .create(&PostParams::default(), &object)
            .await
            .map_err(|e| Error::kube(format!("create {}", self.describe_ref()), e))?;
        self.store(created).await;
        self.committed.store(true, Ordering::SeqCst);
        debug!(resource = %self.describe_ref(), "Committed");
        Ok(())
    }

    /// Server-side apply of the local copy
    pub async fn apply(&self) -> Result<()> {
        let mut object = self.snapshot().await;
        object.meta_mut().resource_version = None;
        object.meta_mut().managed_fields = None;
        let applied = self
            .api()
            .patch(
                &self.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&object),
            )
            .await
            .map_err(|e| Error::kube(format!("apply {}", self.describe_ref()), e))?;
        self.store(applied).await;
        self.committed.store(true, Ordering::SeqCst);
        debug!(resource = %self.describe_ref(), "Applied");
        Ok(())
    }

    /// Delete and wait until the server no longer has the object
    pub async fn delete(&self) -> Result<()> {
        match self.api().delete(&self.name, &DeleteParams::background()).await {
            Ok(_) => {}
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!(resource = %self.describe_ref(), "Already deleted");
            }
            Err(e) => return Err(Error::kube(format!("delete {}", self.describe_ref()), e)),
        }
        self.committed.store(false, Ordering::SeqCst);

        let start = Instant::now();
        loop {
            match self.api().get_opt(&self.name).await {
                Ok(None) => return Ok(()),
                Ok(Some(_)) => {}
                Err(e) => debug!(error = %e, "Polling for deletion failed"),
            }
            if start.elapsed() >= self.delete_timeout {
                return Err(Error::timeout(
                    format!("delete {}", self.describe_ref()),
                    self.delete_timeout.as_millis() as u64,
                ));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    /// Reload the local copy from the server; updates `committed`
    pub async fn refresh(&self) -> Result<()> {
        match self
            .api()
            .get_opt(&self.name)
            .await
            .map_err(|e| Error::kube(format!("get {}", self.describe_ref()), e))?
        {
            Some(object) => {
                self.store(object).await;
                self.committed.store(true, Ordering::SeqCst);
            }
            None => self.committed.store(false, Ordering::SeqCst),
        }
        Ok(())
    }

    /// Whether the server holds this object
    pub async fn exists(&self) -> Result<bool> {
        self.refresh().await?;
        Ok(self.is_committed())
    }

    /// Poll with refresh until `predicate` holds; `false` on timeout
    pub async fn wait_until<P>(&self, wait: Wait, mut predicate: P) -> bool
    where
        P: FnMut(&K) -> bool + Send,
    {
        self.wait_for(wait, |object| predicate(object).then_some(true))
            .await
    }

    /// Poll with refresh until `decide` returns a verdict; `false` on timeout
    pub async fn wait_for<P>(&self, wait: Wait, mut decide: P) -> bool
    where
        P: FnMut(&K) -> Option<bool> + Send,
    {
        let start = Instant::now();
        loop {
            match self.refresh().await {
                Ok(()) if self.is_committed() => {
                    if let Some(verdict) = decide(&*self.object.read().await) {
                        return verdict;
                    }
                }
                Ok(()) => debug!(resource = %self.describe_ref(), "Waiting on missing object"),
                Err(e) => debug!(error = %e, "Refresh failed while waiting"),
            }

            let elapsed = start.elapsed();
            if elapsed >= wait.timelimit {
                debug!(resource = %self.describe_ref(), "Wait timed out");
                return false;
            }
            tokio::time::sleep(wait.interval.min(wait.timelimit - elapsed)).await;
        }
    }

    /// Single entry point for spec mutation
    ///
    /// Uncommitted: mutate the local copy only. Committed: route through
    /// [`Resource::modify_and_apply`]; the mutator may run more than once.
    pub async fn modify<F>(&self, mut mutator: F) -> Result<()>
    where
        F: FnMut(&mut K) + Send,
    {
        if self.is_committed() {
            self.modify_and_apply(mutator, DEFAULT_CONFLICT_RETRIES).await
        } else {
            mutator(&mut *self.object.write().await);
            Ok(())
        }
    }

    /// Read-modify-write with retry on conflict
    ///
    /// Each attempt fetches the current object, applies `mutator` to it, and
    /// replaces it with the fetched `resourceVersion`.
    pub async fn modify_and_apply<F>(&self, mut mutator: F, retries: u32) -> Result<()>
    where
        F: FnMut(&mut K) + Send,
    {
        let api = self.api();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut fresh = api
                .get(&self.name)
                .await
                .map_err(|e| Error::kube(format!("get {}", self.describe_ref()), e))?;
            mutator(&mut fresh);

            match api.replace(&self.name, &PostParams::default(), &fresh).await {
                Ok(updated) => {
                    self.store(updated).await;
                    debug!(resource = %self.describe_ref(), attempt, "Modified");
                    return Ok(());
                }
                Err(kube::Error::Api(response)) if response.code == 409 => {
                    if attempt > retries {
                        warn!(resource = %self.describe_ref(), attempt, "Conflict retries exhausted");
                        return Err(Error::conflict(Self::kind(), self.name.clone(), attempt));
                    }
                    debug!(resource = %self.describe_ref(), attempt, "Conflict, retrying");
                }
                Err(e) => {
                    return Err(Error::kube(format!("replace {}", self.describe_ref()), e));
                }
            }
        }
    }

    /// Dict-style mutation through the JSON form of the object
    pub async fn modify_value<F>(&self, mut mutator: F) -> Result<()>
    where
        F: FnMut(&mut serde_json::Value) + Send,
    {
        let mut failure = None;
        self.modify(|object| match serde_json::to_value(&*object) {
            Ok(mut value) => {
                mutator(&mut value);
                match serde_json::from_value::<K>(value) {
                    Ok(updated) => *object = updated,
                    Err(e) => failure = Some(e),
                }
            }
            Err(e) => failure = Some(e),
        })
        .await?;
        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn describe_ref(&self) -> String {
        format!("{}/{}/{}", K::kind(&()), self.namespace, self.name)
    }
}

#[async_trait]
impl<K> Lifecycle for Resource<K>
where
    K: KubeObject + Readiness,
{
    fn describe(&self) -> String {
        self.describe_ref()
    }

    async fn commit(&self) -> Result<()> {
        Resource::commit(self).await
    }

    async fn delete(&self) -> Result<()> {
        Resource::delete(self).await
    }

    async fn wait_for_ready(&self) -> bool {
        let mut failures = 0;
        let ready = self
            .wait_for(self.ready_wait, |object| {
                if object.is_ready() {
                    return Some(true);
                }
                if object.has_failed() {
                    failures += 1;
                    if failures > MAX_TOLERATED_FAILURES {
                        warn!(resource = %self.describe_ref(), failures, "Giving up on failed object");
                        return Some(false);
                    }
                } else {
                    failures = 0;
                }
                None
            })
            .await;
        if ready {
            if let Some(delay) = self.settle_delay {
                debug!(resource = %self.describe_ref(), delay_secs = delay.as_secs(), "Settling");
                tokio::time::sleep(delay).await;
            }
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::offline_cluster;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..ConfigMap::default()
        }
    }

    #[tokio::test]
    async fn new_resource_defaults_namespace_and_is_uncommitted() {
        let resource = Resource::new(&offline_cluster(), config_map("cm"));
        assert_eq!(resource.namespace(), "kuadrant");
        assert_eq!(resource.name(), "cm");
        assert!(!resource.is_committed());
        assert_eq!(Resource::<ConfigMap>::kind(), "ConfigMap");
    }

    #[tokio::test]
    async fn modify_on_uncommitted_resource_stays_local() {
        // The cluster is unreachable: any server call would fail.
        let resource = Resource::new(&offline_cluster(), config_map("cm"));
        resource
            .modify(|cm| {
                cm.data
                    .get_or_insert_with(Default::default)
                    .insert("key".to_string(), "value".to_string());
            })
            .await
            .unwrap();
        let data = resource.read(|cm| cm.data.clone()).await.unwrap();
        assert_eq!(data.get("key").map(String::as_str), Some("value"));
    }

    #[tokio::test]
    async fn modify_value_edits_through_json() {
        let resource = Resource::new(&offline_cluster(), config_map("cm"));
        resource
            .modify_value(|value| {
                value["data"] = serde_json::json!({"a": "b"});
            })
            .await
            .unwrap();
        let value = resource.to_value().await.unwrap();
        assert_eq!(value["data"]["a"], "b");
    }

    #[tokio::test]
    async fn explicit_namespace_is_kept() {
        let mut cm = config_map("cm");
        cm.metadata.namespace = Some("tools".to_string());
        let resource = Resource::new(&offline_cluster(), cm);
        assert_eq!(resource.namespace(), "tools");
        assert_eq!(resource.cluster().project(), "tools");
    }
}
