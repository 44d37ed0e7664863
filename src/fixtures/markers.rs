//! Test markers and selection.
//!
//! `KUADRANT_MARKERS` holds a comma-separated list of terms. A bare marker
//! selects tests carrying it; `not <marker>` excludes them. With no bare
//! terms every test not excluded runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub const MARKERS_ENV: &str = "KUADRANT_MARKERS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    Authorino,
    Limitador,
    KuadrantOnly,
    Multicluster,
    Disruptive,
    Smoke,
    Dnspolicy,
    Tlspolicy,
    Observability,
    Extensions,
}

impl Marker {
    pub const ALL: [Marker; 10] = [
        Marker::Authorino,
        Marker::Limitador,
        Marker::KuadrantOnly,
        Marker::Multicluster,
        Marker::Disruptive,
        Marker::Smoke,
        Marker::Dnspolicy,
        Marker::Tlspolicy,
        Marker::Observability,
        Marker::Extensions,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Marker::Authorino => "authorino",
            Marker::Limitador => "limitador",
            Marker::KuadrantOnly => "kuadrant_only",
            Marker::Multicluster => "multicluster",
            Marker::Disruptive => "disruptive",
            Marker::Smoke => "smoke",
            Marker::Dnspolicy => "dnspolicy",
            Marker::Tlspolicy => "tlspolicy",
            Marker::Observability => "observability",
            Marker::Extensions => "extensions",
        }
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Marker {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Marker::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::config(format!("unknown marker '{}'", s)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerFilter {
    include: Vec<Marker>,
    exclude: Vec<Marker>,
}

impl MarkerFilter {
    /// Selects everything
    pub fn all() -> Self {
        Self::default()
    }

    pub fn parse(expression: &str) -> Result<Self> {
        let mut filter = Self::default();
        for term in expression.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match term.strip_prefix("not ") {
                Some(negated) => filter.exclude.push(negated.trim().parse()?),
                None => filter.include.push(term.parse()?),
            }
        }
        Ok(filter)
    }

    /// Filter from `KUADRANT_MARKERS`; unset selects everything
    pub fn from_env() -> Result<Self> {
        match std::env::var(MARKERS_ENV) {
            Ok(expression) => Self::parse(&expression),
            Err(_) => Ok(Self::all()),
        }
    }

    pub fn selects(&self, markers: &[Marker]) -> bool {
        if markers.iter().any(|m| self.exclude.contains(m)) {
            return false;
        }
        self.include.is_empty() || markers.iter().any(|m| self.include.contains(m))
    }
}
