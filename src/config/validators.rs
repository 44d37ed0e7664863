//! Declarative validators evaluated when a configuration section is accessed.
//!
//! Validation is per section on purpose: a run that never touches Auth0 must
//! not fail because Auth0 credentials are absent.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::errors::{Error, Result};

/// Resolve a dotted, case-insensitive key in a JSON tree
pub fn get_path<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(root, |node, segment| node.get(segment.to_ascii_lowercase().as_str()))
}

/// Present and not null, false, or empty
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

/// A single rule over the configuration tree
#[derive(Debug, Clone)]
pub enum Validator {
    /// The key must be present
    Required(String),
    /// At least one of the keys must be present
    OneOf(Vec<String>),
    /// The key, if present, must be a string matching the pattern
    Matches { key: String, pattern: Regex },
}

impl Validator {
    pub fn required(key: impl Into<String>) -> Self {
        Validator::Required(key.into())
    }

    pub fn one_of<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Validator::OneOf(keys.into_iter().map(Into::into).collect())
    }

    pub fn matches(key: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            Error::config_with_source(format!("invalid validator pattern {}", pattern), Box::new(e))
        })?;
        Ok(Validator::Matches {
            key: key.into(),
            pattern,
        })
    }

    /// Check the rule against the (partially resolved) configuration tree
    pub fn check(&self, root: &Value) -> Result<()> {
        match self {
            Validator::Required(key) => {
                if is_truthy(get_path(root, key)) {
                    Ok(())
                } else {
                    Err(Error::config(format!("{} must be set", key)))
                }
            }
            Validator::OneOf(keys) => {
                if keys.iter().any(|key| is_truthy(get_path(root, key))) {
                    Ok(())
                } else {
                    Err(Error::config(format!("either {} must be set", keys.join(" or "))))
                }
            }
            Validator::Matches { key, pattern } => match get_path(root, key) {
                None | Some(Value::Null) => Ok(()),
                Some(Value::String(s)) if pattern.is_match(s) => Ok(()),
                Some(other) => Err(Error::config(format!(
                    "{} = {} does not match {}",
                    key,
                    other,
                    pattern.as_str()
                ))),
            },
        }
    }

    /// Keys this rule reads
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Validator::Required(key) | Validator::Matches { key, .. } => vec![key.as_str()],
            Validator::OneOf(keys) => keys.iter().map(String::as_str).collect(),
        }
    }
}

/// Validators grouped by the section (top-level or dotted prefix) they guard
#[derive(Debug, Clone, Default)]
pub struct ValidatorSet {
    sections: BTreeMap<String, Vec<Validator>>,
}

impl ValidatorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validator guarding `section`
    pub fn register(&mut self, section: impl Into<String>, validator: Validator) -> &mut Self {
        self.sections
            .entry(section.into().to_ascii_lowercase())
            .or_default()
            .push(validator);
        self
    }

    /// Validators whose section is `key` or an ancestor/descendant of it
    pub fn for_key<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Validator> + 'a {
        let key = key.trim_matches('.');
        self.sections
            .iter()
            .filter(move |(section, _)| {
                key.is_empty()
                    || section.as_str() == key
                    || key.starts_with(&format!("{}.", section))
                    || section.starts_with(&format!("{}.", key))
            })
            .flat_map(|(_, validators)| validators.iter())
    }

    /// Run every validator relevant to `key`, collecting all failures
    pub fn validate(&self, key: &str, root: &Value) -> Result<()> {
        let failures: Vec<String> = self
            .for_key(key)
            .filter_map(|validator| validator.check(root).err())
            .map(|e| match e {
                Error::Configuration { message, .. } => message,
                other => other.to_string(),
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::config(failures.join("; ")))
        }
    }
}

/// Validators shipped with the harness
pub fn default_validators() -> ValidatorSet {
    let mut set = ValidatorSet::new();
    set.register(
        "service_protection.authorino",
        Validator::one_of([
            "service_protection.authorino.deploy",
            "service_protection.authorino.auth_url",
        ]),
    )
    .register("keycloak", Validator::required("keycloak.url"))
    .register("keycloak", Validator::required("keycloak.password"))
    .register("auth0", Validator::required("auth0.url"))
    .register("auth0", Validator::required("auth0.client_id"))
    .register("auth0", Validator::required("auth0.client_secret"))
    .register("mockserver", Validator::required("mockserver.url"))
    .register("tracing", Validator::one_of(["tracing.query_url", "tracing.collector_url"]))
    .register("prometheus", Validator::required("prometheus.url"))
    .register("control_plane", Validator::required("control_plane.provider_secret"));
    set
}
