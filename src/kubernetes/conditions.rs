//! Status conditions and partial matching against them.

use serde::{Deserialize, Serialize};

/// One entry of `status.conditions[]`
///
/// Lenient on purpose: controllers under test omit fields freely, so every
/// field except `type` and `status` is optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }

    pub fn is_false(&self) -> bool {
        self.status == "False"
    }
}

/// Partial condition match: `type` and `status` exactly, `reason` exactly if
/// given, `message` by substring if given
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionMatcher {
    pub type_: String,
    pub status: String,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ConditionMatcher {
    pub fn new(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: status.into(),
            reason: None,
            message: None,
        }
    }

    /// `<type>=True`
    pub fn is_true(type_: impl Into<String>) -> Self {
        Self::new(type_, "True")
    }

    /// `<type>=False`
    pub fn is_false(type_: impl Into<String>) -> Self {
        Self::new(type_, "False")
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Substring the condition message must contain
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn matches(&self, condition: &Condition) -> bool {
        if condition.type_ != self.type_ || condition.status != self.status {
            return false;
        }
        if let Some(reason) = &self.reason {
            if condition.reason.as_deref() != Some(reason.as_str()) {
                return false;
            }
        }
        if let Some(message) = &self.message {
            match &condition.message {
                Some(actual) if actual.contains(message.as_str()) => {}
                _ => return false,
            }
        }
        true
    }

    /// True if any of `conditions` matches
    pub fn any(&self, conditions: &[Condition]) -> bool {
        conditions.iter().any(|c| self.matches(c))
    }
}

/// Objects exposing `status.conditions[]`
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];

    /// First condition of the given type
    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Ready means at least one condition and every condition `True`
    fn all_conditions_true(&self) -> bool {
        all_true(self.conditions())
    }

    fn has_condition(&self, matcher: &ConditionMatcher) -> bool {
        matcher.any(self.conditions())
    }
}

/// At least one condition and all of them `True`
pub fn all_true(conditions: &[Condition]) -> bool {
    !conditions.is_empty() && conditions.iter().all(Condition::is_true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(type_: &str, status: &str, reason: &str, message: &str) -> Condition {
        Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            ..Condition::default()
        }
    }

    #[test]
    fn matcher_is_partial_on_message() {
        let c = condition(
            "Ready",
            "False",
            "HostsNotLinked",
            "One or more hosts are not linked to the resource: [*.example.com]",
        );
        assert!(ConditionMatcher::is_false("Ready")
            .reason("HostsNotLinked")
            .message("One or more hosts are not linked to the resource")
            .matches(&c));
        assert!(!ConditionMatcher::is_true("Ready").matches(&c));
        assert!(!ConditionMatcher::is_false("Ready").reason("Other").matches(&c));
        assert!(!ConditionMatcher::is_false("Ready").message("not found").matches(&c));
    }

    #[test]
    fn all_true_requires_conditions() {
        assert!(!all_true(&[]));
        assert!(all_true(&[condition("Accepted", "True", "", ""), condition("Enforced", "True", "", "")]));
        assert!(!all_true(&[condition("Accepted", "True", "", ""), condition("Enforced", "Unknown", "", "")]));
    }

    #[test]
    fn deserializes_minimal_condition() {
        let c: Condition = serde_json::from_str(r#"{"type":"Programmed","status":"True"}"#).unwrap();
        assert!(c.is_true());
        assert!(c.reason.is_none());
    }
}
