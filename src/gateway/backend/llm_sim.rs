//! OpenAI-compatible LLM simulator for token rate limiting.

use std::collections::BTreeMap;

use super::ServiceBackend;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::objects::deployment::DeploymentBuilder;

pub const LLM_SIM_PORT: i32 = 8000;

/// Model name the simulator answers for
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.1-8B-Instruct";

pub fn llm_sim(cluster: &ClusterClient, name: &str, label: &str, image: &str) -> ServiceBackend {
    let port = LLM_SIM_PORT.to_string();
    let deployment = DeploymentBuilder::new(name, image)
        .label("app", label)
        .port("http", LLM_SIM_PORT)
        .args(["--model", DEFAULT_MODEL, "--port", port.as_str(), "--mode", "random"])
        .readiness_probe("/health", LLM_SIM_PORT);
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), label.to_string());
    ServiceBackend::new(cluster, deployment, 80, LLM_SIM_PORT, labels)
}
