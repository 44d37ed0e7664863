//! Secrets: opaque, TLS, and API-key flavours.
//!
//! `data` values travel base64-encoded on the wire; `ByteString` does the
//! encoding, so everything here works with plain strings.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Readiness, Resource};
use crate::utils::certificates::TlsMaterial;

/// Key holding the API key in an API-key secret
pub const API_KEY_FIELD: &str = "api_key";

/// Label the authorization service uses to discover API-key secrets
pub const MANAGED_BY_LABEL: &str = "authorino.kuadrant.io/managed-by";

impl Readiness for Secret {
    fn is_ready(&self) -> bool {
        true
    }
}

fn encode(data: BTreeMap<String, String>) -> BTreeMap<String, ByteString> {
    data.into_iter()
        .map(|(k, v)| (k, ByteString(v.into_bytes())))
        .collect()
}

/// Uncommitted opaque secret
pub fn secret(
    cluster: &ClusterClient,
    name: &str,
    data: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
) -> Resource<Secret> {
    let object = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(encode(data)),
        ..Secret::default()
    };
    Resource::new(cluster, object)
}

/// Uncommitted `kubernetes.io/tls` secret; the chain, if any, lands in `ca.crt`
pub fn tls_secret(cluster: &ClusterClient, name: &str, material: &TlsMaterial) -> Resource<Secret> {
    let mut data = BTreeMap::new();
    data.insert("tls.crt".to_string(), material.certificate.clone());
    data.insert("tls.key".to_string(), material.key.clone());
    if let Some(chain) = &material.chain {
        data.insert("ca.crt".to_string(), chain.clone());
    }
    let object = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(encode(data)),
        ..Secret::default()
    };
    Resource::new(cluster, object)
}

/// Uncommitted API-key secret discoverable by label `group: <label>`
pub fn api_key_secret(
    cluster: &ClusterClient,
    name: &str,
    label: &str,
    api_key: &str,
) -> Resource<Secret> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), "authorino".to_string());
    labels.insert("group".to_string(), label.to_string());
    let mut data = BTreeMap::new();
    data.insert(API_KEY_FIELD.to_string(), api_key.to_string());
    secret(cluster, name, data, labels)
}

impl Resource<Secret> {
    /// Decoded value of `key`, from `data` or `stringData`
    pub async fn value(&self, key: &str) -> Result<Option<String>> {
        let raw = self
            .read(|s| {
                s.data
                    .as_ref()
                    .and_then(|d| d.get(key).map(|b| b.0.clone()))
                    .or_else(|| {
                        s.string_data
                            .as_ref()
                            .and_then(|d| d.get(key).map(|v| v.clone().into_bytes()))
                    })
            })
            .await;
        raw.map(|bytes| {
            String::from_utf8(bytes).map_err(|e| {
                Error::config_with_source(format!("secret key {} is not UTF-8", key), Box::new(e))
            })
        })
        .transpose()
    }

    /// Decoded API key of an API-key secret
    pub async fn api_key(&self) -> Result<Option<String>> {
        self.value(API_KEY_FIELD).await
    }

    /// Replace the API key, reaching the server when committed
    pub async fn update_api_key(&self, api_key: &str) -> Result<()> {
        self.modify(|s| {
            s.data
                .get_or_insert_with(BTreeMap::new)
                .insert(API_KEY_FIELD.to_string(), ByteString(api_key.as_bytes().to_vec()));
        })
        .await
    }

    /// Certificate and key of a TLS secret
    pub async fn tls_material(&self) -> Result<Option<TlsMaterial>> {
        let certificate = self.value("tls.crt").await?;
        let key = self.value("tls.key").await?;
        let chain = self.value("ca.crt").await?;
        Ok(match (certificate, key) {
            (Some(certificate), Some(key)) => Some(TlsMaterial { certificate, key, chain }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::offline_cluster;

    #[tokio::test]
    async fn api_key_secret_round_trips_and_is_labelled() {
        let secret = api_key_secret(&offline_cluster(), "api-key", "basic", "top-secret");
        assert_eq!(secret.api_key().await.unwrap().as_deref(), Some("top-secret"));

        let labels = secret.read(|s| s.metadata.labels.clone()).await.unwrap();
        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some("authorino"));
        assert_eq!(labels.get("group").map(String::as_str), Some("basic"));

        let wire = serde_json::to_value(secret.snapshot().await).unwrap();
        assert_eq!(wire["data"]["api_key"], "dG9wLXNlY3JldA==");
    }

    #[tokio::test]
    async fn update_api_key_re_encodes_locally() {
        let secret = api_key_secret(&offline_cluster(), "api-key", "basic", "one");
        secret.update_api_key("two").await.unwrap();
        assert_eq!(secret.api_key().await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn tls_secret_exposes_material() {
        let material = TlsMaterial {
            certificate: "CERT".to_string(),
            key: "KEY".to_string(),
            chain: Some("CA".to_string()),
        };
        let secret = tls_secret(&offline_cluster(), "gateway-tls", &material);
        assert_eq!(secret.tls_material().await.unwrap(), Some(material));
    }
}
