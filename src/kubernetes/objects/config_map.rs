//! ConfigMap wrapper with dict-style data access.

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

use crate::errors::Result;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Readiness, Resource};

impl Readiness for ConfigMap {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Uncommitted ConfigMap holding `data`
pub fn config_map(
    cluster: &ClusterClient,
    name: &str,
    data: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
) -> Resource<ConfigMap> {
    let object = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..ConfigMap::default()
    };
    Resource::new(cluster, object)
}

impl Resource<ConfigMap> {
    /// Value stored under `key`
    pub async fn get(&self, key: &str) -> Option<String> {
        self.read(|cm| cm.data.as_ref().and_then(|d| d.get(key).cloned()))
            .await
    }

    /// Store `value` under `key`, reaching the server when committed
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.modify(|cm| {
            cm.data
                .get_or_insert_with(BTreeMap::new)
                .insert(key.to_string(), value.to_string());
        })
        .await
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.modify(|cm| {
            if let Some(data) = cm.data.as_mut() {
                data.remove(key);
            }
        })
        .await
    }
}
