//! httpbin: echoes requests back, the default route target.

use std::collections::BTreeMap;

use super::ServiceBackend;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::deployment::DeploymentBuilder;

pub const HTTPBIN_PORT: i32 = 8080;

pub fn httpbin(
    cluster: &ClusterClient,
    name: &str,
    label: &str,
    image: &str,
    replicas: i32,
) -> ServiceBackend {
    let deployment = DeploymentBuilder::new(name, image)
        .label("app", label)
        .replicas(replicas)
        .port("http", HTTPBIN_PORT)
        .readiness_probe("/status/200", HTTPBIN_PORT);
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), label.to_string());
    ServiceBackend::new(cluster, deployment, HTTPBIN_PORT, HTTPBIN_PORT, labels)
}
