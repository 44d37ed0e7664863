//! Authorization pattern algebra.
//!
//! A [`Rule`] is either a single pattern over a selector of the
//! authorization JSON, a disjunction, a conjunction, or a reference to a
//! named pattern group. Rules serialize to the shapes the authorization
//! service expects (`{selector, operator, value}`, `{any: [...]}`,
//! `{all: [...]}`, `{patternRef: name}`) and can be evaluated locally
//! against a sample document.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::{Error, Result};

/// Named pattern groups, `spec.patterns`
pub type Patterns = BTreeMap<String, Vec<Rule>>;

const MAX_REF_DEPTH: usize = 16;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Neq,
    Incl,
    Excl,
    /// Regex search; anchored only when the expression has `^` or `$`
    Matches,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Rule {
    Pattern {
        selector: String,
        operator: Operator,
        value: String,
    },
    Any {
        any: Vec<Rule>,
    },
    All {
        all: Vec<Rule>,
    },
    Ref {
        #[serde(rename = "patternRef")]
        pattern_ref: String,
    },
}

impl Rule {
    pub fn pattern(selector: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Rule::Pattern {
            selector: selector.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self::pattern(selector, Operator::Eq, value)
    }

    pub fn neq(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self::pattern(selector, Operator::Neq, value)
    }

    pub fn incl(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self::pattern(selector, Operator::Incl, value)
    }

    pub fn excl(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self::pattern(selector, Operator::Excl, value)
    }

    pub fn matches(selector: impl Into<String>, expression: impl Into<String>) -> Self {
        Self::pattern(selector, Operator::Matches, expression)
    }

    pub fn any(rules: Vec<Rule>) -> Self {
        Rule::Any { any: rules }
    }

    pub fn all(rules: Vec<Rule>) -> Self {
        Rule::All { all: rules }
    }

    pub fn reference(name: impl Into<String>) -> Self {
        Rule::Ref {
            pattern_ref: name.into(),
        }
    }

    /// Evaluate against an authorization JSON document
    ///
    /// `patterns` resolves `patternRef`s; a group holds when all of its
    /// rules hold. Unknown references and invalid regexes are errors.
    pub fn evaluate(&self, document: &Value, patterns: &Patterns) -> Result<bool> {
        self.evaluate_at(document, patterns, 0)
    }

    fn evaluate_at(&self, document: &Value, patterns: &Patterns, depth: usize) -> Result<bool> {
        match self {
            Rule::Pattern {
                selector,
                operator,
                value,
            } => evaluate_pattern(select(document, selector), *operator, value),
            Rule::Any { any } => {
                for rule in any {
                    if rule.evaluate_at(document, patterns, depth)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Rule::All { all } => all_hold(all, document, patterns, depth),
            Rule::Ref { pattern_ref } => {
                if depth >= MAX_REF_DEPTH {
                    return Err(Error::config(format!(
                        "pattern reference {} nests too deep (cycle?)",
                        pattern_ref
                    )));
                }
                let group = patterns.get(pattern_ref).ok_or_else(|| {
                    Error::config(format!("unknown pattern reference {}", pattern_ref))
                })?;
                all_hold(group, document, patterns, depth + 1)
            }
        }
    }
}

/// Conjunction, as used by `when` lists and pattern groups
pub fn evaluate_all(rules: &[Rule], document: &Value, patterns: &Patterns) -> Result<bool> {
    all_hold(rules, document, patterns, 0)
}

fn all_hold(rules: &[Rule], document: &Value, patterns: &Patterns, depth: usize) -> Result<bool> {
    for rule in rules {
        if !rule.evaluate_at(document, patterns, depth)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Dotted selector lookup; numeric segments index arrays
///
/// Keys may contain dashes (`context.request.http.headers.x-user-id`).
pub fn select<'a>(document: &'a Value, selector: &str) -> Option<&'a Value> {
    selector
        .split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(document, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// String form the operators compare; missing and null are empty
fn as_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn contains(selected: Option<&Value>, expected: &str) -> bool {
    match selected {
        Some(Value::Array(items)) => items.iter().any(|item| as_text(Some(item)) == expected),
        _ => false,
    }
}

fn evaluate_pattern(selected: Option<&Value>, operator: Operator, expected: &str) -> Result<bool> {
    Ok(match operator {
        Operator::Eq => as_text(selected) == expected,
        Operator::Neq => as_text(selected) != expected,
        Operator::Incl => contains(selected, expected),
        Operator::Excl => !contains(selected, expected),
        Operator::Matches => {
            let regex = Regex::new(expected)
                .map_err(|e| Error::config(format!("invalid pattern regex {}: {}", expected, e)))?;
            regex.is_match(&as_text(selected))
        }
    })
}
