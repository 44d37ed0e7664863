//! ServiceAccount wrapper with bound-token issuance.

use k8s_openapi::api::authentication::v1::{TokenRequest, TokenRequestSpec};
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::api::{Api, ObjectMeta, PostParams};

use crate::errors::{Error, Result};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::{Readiness, Resource};

impl Readiness for ServiceAccount {
    fn is_ready(&self) -> bool {
        true
    }
}

pub fn service_account(cluster: &ClusterClient, name: &str) -> Resource<ServiceAccount> {
    Resource::new(
        cluster,
        ServiceAccount {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..ServiceAccount::default()
        },
    )
}

impl Resource<ServiceAccount> {
    /// Short-lived token bound to `audiences` (Kubernetes identity tests)
    pub async fn token(&self, audiences: &[String], expiration_seconds: Option<i64>) -> Result<String> {
        let api: Api<ServiceAccount> = self.api();
        let request = TokenRequest {
            spec: TokenRequestSpec {
                audiences: audiences.to_vec(),
                expiration_seconds,
                ..TokenRequestSpec::default()
            },
            ..TokenRequest::default()
        };
        let response = api
            .create_token_request(self.name(), &PostParams::default(), &request)
            .await
            .map_err(|e| Error::kube(format!("token for serviceaccount {}", self.name()), e))?;
        response
            .status
            .map(|s| s.token)
            .ok_or_else(|| Error::control_plane("token request returned no status"))
    }
}
