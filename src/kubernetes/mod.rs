//! # Kubernetes
//!
//! Cluster client bound to a namespace, the generic [`Resource`] wrapper with
//! its commit/modify/delete/wait lifecycle, status-condition matching, and
//! typed builders for the objects scenarios create.

pub mod client;
pub mod conditions;
pub mod objects;
pub mod resource;

pub use client::{ActionOptions, ActionOutput, ClusterClient, ClusterOptions};
pub use conditions::{Condition, ConditionMatcher, HasConditions};
pub use resource::{KubeObject, Lifecycle, Readiness, Resource};

/// Client in project `kuadrant` talking to `uri` (usually a wiremock server)
#[cfg(test)]
pub(crate) fn test_cluster(uri: &str) -> ClusterClient {
    let config = kube::Config::new(uri.parse().unwrap());
    ClusterClient::from_client(
        kube::Client::try_from(config).unwrap(),
        ClusterOptions {
            project: "kuadrant".to_string(),
            ..ClusterOptions::default()
        },
    )
}

/// Client pointed at an address nothing listens on; any server call fails
#[cfg(test)]
pub(crate) fn offline_cluster() -> ClusterClient {
    test_cluster("http://127.0.0.1:1")
}
