//! # Policy wrappers
//!
//! Kuadrant policies are plain custom resources handled through
//! [`Resource`]; this module adds what they share on top of it: a
//! `targetRef`, the `Accepted`/`Enforced` condition protocol, and CEL
//! predicates. Each policy kind lives in its own submodule with a
//! constructor function and inherent builder methods on `Resource<Kind>`.
//!
//! Readiness of every policy is `Enforced=True`. A policy that keeps
//! reporting `Enforced=False` fails the wait after
//! [`MAX_TOLERATED_FAILURES`] consecutive polls instead of burning the whole
//! timeout.

pub mod authorization;
pub mod dns;
pub mod oidc;
pub mod plan;
pub mod rate_limit;
pub mod rules;
pub mod telemetry;
pub mod tls;
pub mod token_rate_limit;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::gateway::{Reference, Referencable};
use crate::kubernetes::conditions::{Condition, ConditionMatcher, HasConditions};
use crate::kubernetes::resource::{KubeObject, Lifecycle, Readiness, Resource};
use crate::utils::timeout::{Wait, DEFAULT_TIMEOUT};

pub use crate::kubernetes::resource::MAX_TOLERATED_FAILURES;
pub use authorization::{AuthConfig, AuthPolicy};
pub use dns::DNSPolicy;
pub use oidc::OIDCPolicy;
pub use plan::PlanPolicy;
pub use rate_limit::{Limit, RateLimitPolicy};
pub use rules::{Operator, Rule};
pub use telemetry::TelemetryPolicy;
pub use tls::TLSPolicy;
pub use token_rate_limit::{TokenRateLimitPolicy, TokenUsage};

pub const ACCEPTED: &str = "Accepted";
pub const ENFORCED: &str = "Enforced";

/// `spec.targetRef` of a policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetRef {
    pub group: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl TargetRef {
    /// Target a whole Gateway or HTTPRoute
    pub fn to(target: &dyn Referencable) -> Self {
        Self::from(&target.reference())
    }

    /// Target one listener of a Gateway or one rule of an HTTPRoute
    pub fn section(target: &dyn Referencable, section_name: impl Into<String>) -> Self {
        Self {
            section_name: Some(section_name.into()),
            ..Self::to(target)
        }
    }
}

impl From<&Reference> for TargetRef {
    fn from(reference: &Reference) -> Self {
        Self {
            group: reference.group.clone(),
            kind: reference.kind.clone(),
            name: reference.name.clone(),
            section_name: None,
        }
    }
}

/// Status shared by every Kuadrant policy
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// CEL predicate, `{predicate: "..."}`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Predicate {
    pub predicate: String,
}

impl Predicate {
    pub fn new(predicate: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
        }
    }
}

/// CEL expression, `{expression: "..."}`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Expression {
    pub expression: String,
}

impl Expression {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}

/// How `defaults`/`overrides` blocks merge with lower-level policies
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Atomic,
    Merge,
}

/// Which block of a policy a builder writes to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    /// Top-level rules (implicit defaults)
    Root,
    Defaults,
    Overrides,
}

/// Policy custom resources: a target and `status.conditions`
pub trait PolicyObject: KubeObject + HasConditions + Readiness {
    fn target_ref(&self) -> &TargetRef;
}

/// Readiness of policies: `Enforced=True`, failed on `Enforced=False`
pub(crate) fn enforced(conditions: &[Condition]) -> bool {
    ConditionMatcher::is_true(ENFORCED).any(conditions)
}

pub(crate) fn not_enforced(conditions: &[Condition]) -> bool {
    ConditionMatcher::is_false(ENFORCED).any(conditions)
}

/// `HasConditions`, `Readiness` and `PolicyObject` for a policy CRD whose
/// status is a [`PolicyStatus`] and whose spec carries `target_ref`
macro_rules! policy_object {
    ($($kind:ty),+ $(,)?) => {
        $(
            impl $crate::kubernetes::conditions::HasConditions for $kind {
                fn conditions(&self) -> &[$crate::kubernetes::conditions::Condition] {
                    self.status
                        .as_ref()
                        .map(|s| s.conditions.as_slice())
                        .unwrap_or(&[])
                }
            }

            impl $crate::kubernetes::resource::Readiness for $kind {
                fn is_ready(&self) -> bool {
                    $crate::policy::enforced(
                        $crate::kubernetes::conditions::HasConditions::conditions(self),
                    )
                }

                fn has_failed(&self) -> bool {
                    $crate::policy::not_enforced(
                        $crate::kubernetes::conditions::HasConditions::conditions(self),
                    )
                }
            }

            impl $crate::policy::PolicyObject for $kind {
                fn target_ref(&self) -> &$crate::policy::TargetRef {
                    &self.spec.target_ref
                }
            }
        )+
    };
}
pub(crate) use policy_object;

/// Operations every policy supports beyond [`Lifecycle`]
#[async_trait]
pub trait Policy: Lifecycle + Referencable {
    fn kind(&self) -> String;

    async fn target(&self) -> TargetRef;

    async fn conditions(&self) -> Vec<Condition>;

    /// Poll until some condition matches `matcher`; `false` on timeout
    async fn wait_for_condition(&self, matcher: &ConditionMatcher, wait: Wait) -> bool;

    /// `Accepted=True` within the default timeout
    async fn wait_for_accepted(&self) -> bool {
        let wait = Wait {
            timelimit: DEFAULT_TIMEOUT,
            ..Wait::default()
        };
        self.wait_for_condition(&ConditionMatcher::is_true(ACCEPTED), wait)
            .await
    }
}

impl<K: PolicyObject> Referencable for Resource<K> {
    fn reference(&self) -> Reference {
        Reference::new(
            K::group(&()),
            K::kind(&()),
            self.name(),
            Some(self.namespace().to_string()),
        )
    }
}

#[async_trait]
impl<K: PolicyObject> Policy for Resource<K> {
    fn kind(&self) -> String {
        K::kind(&()).to_string()
    }

    async fn target(&self) -> TargetRef {
        self.read(|p| p.target_ref().clone()).await
    }

    async fn conditions(&self) -> Vec<Condition> {
        self.read(|p| p.conditions().to_vec()).await
    }

    async fn wait_for_condition(&self, matcher: &ConditionMatcher, wait: Wait) -> bool {
        self.wait_until(wait, |p| p.has_condition(matcher)).await
    }
}
