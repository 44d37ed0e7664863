//! SpiceDB backend for relationship-based authorization scenarios.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{Backend, ServiceBackend};
use crate::errors::Result;
use crate::gateway::{Reference, Referencable};
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::deployment::DeploymentBuilder;
use crate::kubernetes::objects::secret::secret;
use crate::kubernetes::resource::Lifecycle;

pub const SPICEDB_GRPC_PORT: i32 = 50051;

/// Key under which the preshared key is stored for the authorization service
pub const PRESHARED_KEY_FIELD: &str = "grpc-preshared-key";

/// SpiceDB server plus the secret holding its preshared key
#[derive(Debug)]
pub struct SpiceDb {
    backend: ServiceBackend,
    secret_name: String,
    preshared_key: String,
}

impl SpiceDb {
    pub fn new(
        cluster: &ClusterClient,
        name: &str,
        label: &str,
        image: &str,
        preshared_key: &str,
    ) -> Self {
        let secret_name = format!("{}-key", name);
        let mut data = BTreeMap::new();
        data.insert(PRESHARED_KEY_FIELD.to_string(), preshared_key.to_string());
        let mut labels = BTreeMap::new();
        labels.insert("app".to_string(), label.to_string());
        let key_secret = secret(cluster, &secret_name, data, labels.clone());

        let deployment = DeploymentBuilder::new(name, image)
            .label("app", label)
            .port("grpc", SPICEDB_GRPC_PORT)
            .args([
                "serve",
                "--grpc-preshared-key",
                preshared_key,
                "--datastore-engine",
                "memory",
            ]);
        let backend = ServiceBackend::new(cluster, deployment, SPICEDB_GRPC_PORT, SPICEDB_GRPC_PORT, labels)
            .with_companion(key_secret);

        Self {
            backend,
            secret_name,
            preshared_key: preshared_key.to_string(),
        }
    }

    /// Secret an authorization rule references for the preshared key
    pub fn secret_name(&self) -> &str {
        &self.secret_name
    }

    pub fn preshared_key(&self) -> &str {
        &self.preshared_key
    }

    /// gRPC endpoint for the authorization service
    pub fn endpoint(&self) -> String {
        self.backend.url()
    }
}

impl Referencable for SpiceDb {
    fn reference(&self) -> Reference {
        self.backend.reference()
    }
}

#[async_trait]
impl Lifecycle for SpiceDb {
    fn describe(&self) -> String {
        self.backend.describe()
    }

    async fn commit(&self) -> Result<()> {
        self.backend.commit().await
    }

    async fn delete(&self) -> Result<()> {
        self.backend.delete().await
    }

    async fn wait_for_ready(&self) -> bool {
        self.backend.wait_for_ready().await
    }
}

impl Backend for SpiceDb {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn namespace(&self) -> &str {
        self.backend.namespace()
    }

    fn port(&self) -> i32 {
        SPICEDB_GRPC_PORT
    }
}
