//! TokenRateLimitPolicy (kuadrant.io/v1alpha1): limits counted in LLM tokens
//! reported by the upstream response instead of in requests.

use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::rate_limit::{limit_host, target_ref, LimitBlock, LimitDefinition};
use super::{policy_object, PolicyStatus, Predicate, TargetRef};
use crate::gateway::Referencable;
use crate::kubernetes::client::ClusterClient;
use crate::kubernetes::resource::Resource;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "kuadrant.io",
    version = "v1alpha1",
    kind = "TokenRateLimitPolicy",
    namespaced,
    status = "PolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct TokenRateLimitPolicySpec {
    pub target_ref: TargetRef,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, LimitDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<LimitBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<LimitBlock>,
}

policy_object!(TokenRateLimitPolicy);
limit_host!(TokenRateLimitPolicy);

/// Uncommitted TokenRateLimitPolicy attached to `target`
pub fn token_rate_limit_policy(
    cluster: &ClusterClient,
    name: &str,
    target: &dyn Referencable,
    section_name: Option<&str>,
    labels: BTreeMap<String, String>,
) -> Resource<TokenRateLimitPolicy> {
    let mut object = TokenRateLimitPolicy::new(
        name,
        TokenRateLimitPolicySpec {
            target_ref: target_ref(target, section_name),
            ..TokenRateLimitPolicySpec::default()
        },
    );
    object.metadata.labels = Some(labels);
    Resource::new(cluster, object)
}

/// `usage` block of an OpenAI-style completion
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage of a non-streaming response body
    pub fn from_response(body: &Value) -> Option<Self> {
        match body.get("usage") {
            Some(Value::Null) | None => None,
            Some(usage) => serde_json::from_value(usage.clone()).ok(),
        }
    }

    /// Usage of a streamed (SSE) response: the last `data:` chunk carrying
    /// a non-null `usage`
    pub fn from_stream(body: &str) -> Option<Self> {
        body.lines()
            .filter_map(|line| line.trim().strip_prefix("data:"))
            .map(str::trim)
            .filter(|data| *data != "[DONE]")
            .filter_map(|data| serde_json::from_str::<Value>(data).ok())
            .filter_map(|chunk| Self::from_response(&chunk))
            .last()
    }

    /// `total_tokens` is the sum of prompt and completion tokens
    pub fn is_consistent(&self) -> bool {
        self.total_tokens > 0 && self.total_tokens == self.prompt_tokens + self.completion_tokens
    }
}
