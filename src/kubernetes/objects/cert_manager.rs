//! cert-manager issuers (cert-manager.io/v1).

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::conditions::{Condition, HasConditions};
use crate::kubernetes::resource::{Readiness, Resource};

/// Reference to an Issuer or ClusterIssuer, as written into a TLSPolicy
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerRef {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_issuer_group")]
    pub group: String,
}

fn default_issuer_group() -> String {
    "cert-manager.io".to_string()
}

impl IssuerRef {
    pub fn issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "Issuer".to_string(),
            group: default_issuer_group(),
        }
    }

    pub fn cluster_issuer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "ClusterIssuer".to_string(),
            group: default_issuer_group(),
        }
    }

    /// Reference with an arbitrary kind; only `Issuer` and `ClusterIssuer` are valid
    pub fn with_kind(name: impl Into<String>, kind: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        if kind != "Issuer" && kind != "ClusterIssuer" {
            return Err(Error::config(format!(
                "issuer kind must be Issuer or ClusterIssuer, got {}",
                kind
            )));
        }
        Ok(Self {
            name: name.into(),
            kind,
            group: default_issuer_group(),
        })
    }

    /// Reference with an unchecked kind, for rejection scenarios
    pub fn unchecked(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            group: default_issuer_group(),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CaIssuer {
    pub secret_name: String,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Issuer",
    namespaced,
    status = "IssuerStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<CaIssuer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_signed: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct IssuerStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HasConditions for Issuer {
    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}

impl Readiness for Issuer {
    fn is_ready(&self) -> bool {
        self.all_conditions_true()
    }
}

/// Namespaced CA issuer signing with the key pair in `secret_name`
pub fn ca_issuer(cluster: &ClusterClient, name: &str, secret_name: &str) -> Resource<Issuer> {
    Resource::new(
        cluster,
        Issuer::new(
            name,
            IssuerSpec {
                ca: Some(CaIssuer {
                    secret_name: secret_name.to_string(),
                }),
                self_signed: None,
            },
        ),
    )
}

/// Namespaced self-signed issuer
pub fn self_signed_issuer(cluster: &ClusterClient, name: &str) -> Resource<Issuer> {
    Resource::new(
        cluster,
        Issuer::new(
            name,
            IssuerSpec {
                ca: None,
                self_signed: Some(serde_json::json!({})),
            },
        ),
    )
}

impl Resource<Issuer> {
    pub fn issuer_ref(&self) -> IssuerRef {
        IssuerRef::issuer(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_issuer_kind() {
        assert!(IssuerRef::with_kind("qe", "ClusterIssuer").is_ok());
        let err = IssuerRef::with_kind("qe", "Secret").unwrap_err();
        assert!(err.to_string().contains("Issuer or ClusterIssuer"));
        assert_eq!(IssuerRef::unchecked("qe", "Secret").kind, "Secret");
    }

    #[test]
    fn self_signed_issuer_serializes_empty_object() {
        let issuer = Issuer::new(
            "selfsigned",
            IssuerSpec {
                ca: None,
                self_signed: Some(serde_json::json!({})),
            },
        );
        let value = serde_json::to_value(&issuer).unwrap();
        assert_eq!(value["spec"]["selfSigned"], serde_json::json!({}));
        assert!(value["spec"].get("ca").is_none());
    }
}
