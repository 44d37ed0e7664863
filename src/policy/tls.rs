//! TLSPolicy (kuadrant.io/v1): cert-manager certificates for Gateway listeners.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{policy_object, PolicyStatus, TargetRef};
use crate::errors::Result;
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::cert_manager::IssuerRef;
use crate::kubernetes::resource::Resource;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PrivateKey {
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_policy: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize)]
#[kube(
    group = "kuadrant.io",
    version = "v1",
    kind = "TLSPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TLSPolicySpec {
    pub target_ref: TargetRef,
    pub issuer_ref: IssuerRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PrivateKey>,
}

policy_object!(TLSPolicy);

/// Uncommitted TLSPolicy for `gateway`, optionally one listener only
///
/// Kinds other than Issuer/ClusterIssuer are accepted here on purpose
/// through [`IssuerRef::unchecked`]; the controller rejects them.
pub fn tls_policy(
    cluster: &ClusterClient,
    name: &str,
    gateway: &dyn Referencable,
    section_name: Option<&str>,
    issuer: IssuerRef,
    labels: BTreeMap<String, String>,
) -> Resource<TLSPolicy> {
    let target_ref = match section_name {
        Some(section) => TargetRef::section(gateway, section),
        None => TargetRef::to(gateway),
    };
    let mut object = TLSPolicy::new(
        name,
        TLSPolicySpec {
            target_ref,
            issuer_ref: issuer,
            common_name: None,
            duration: None,
            renew_before: None,
            usages: Vec::new(),
            private_key: None,
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

impl Resource<TLSPolicy> {
    /// Certificate validity and renewal, cert-manager duration strings
    pub async fn set_lifetime(&self, duration: &str, renew_before: Option<&str>) -> Result<()> {
        self.modify(|p| {
            p.spec.duration = Some(duration.to_string());
            p.spec.renew_before = renew_before.map(str::to_string);
        })
        .await
    }

    pub async fn set_common_name(&self, common_name: &str) -> Result<()> {
        self.modify(|p| p.spec.common_name = Some(common_name.to_string()))
            .await
    }

    pub async fn add_usage(&self, usage: &str) -> Result<()> {
        self.modify(|p| {
            if !p.spec.usages.iter().any(|u| u == usage) {
                p.spec.usages.push(usage.to_string());
            }
        })
        .await
    }

    pub async fn set_private_key(&self, private_key: PrivateKey) -> Result<()> {
        self.modify(|p| p.spec.private_key = Some(private_key.clone()))
            .await
    }
}
