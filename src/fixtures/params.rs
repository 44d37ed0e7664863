//! Scenario parametrization.
//!
//! A [`Parametrization`] maps fixture names to the values they take across
//! test cases; [`Parametrization::cases`] expands it into the cartesian
//! product, each [`Case`] carrying a readable id such as `route-defaults`.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Type-erased fixture or parameter value
pub type FixtureValue = Arc<dyn Any + Send + Sync>;

/// One value a parametrized fixture can take
#[derive(Clone)]
pub enum Param {
    /// A literal value
    Value { id: String, value: FixtureValue },
    /// The value of another fixture, resolved when the case runs
    Indirect(String),
}

impl Param {
    pub fn value<T: Any + Send + Sync>(id: impl Into<String>, value: T) -> Self {
        Param::Value {
            id: id.into(),
            value: Arc::new(value),
        }
    }

    pub fn indirect(fixture: impl Into<String>) -> Self {
        Param::Indirect(fixture.into())
    }

    pub fn id(&self) -> &str {
        match self {
            Param::Value { id, .. } => id,
            Param::Indirect(fixture) => fixture,
        }
    }
}

impl fmt::Debug for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Value { id, .. } => f.debug_tuple("Value").field(id).finish(),
            Param::Indirect(fixture) => f.debug_tuple("Indirect").field(fixture).finish(),
        }
    }
}

/// One concrete assignment of parameters
#[derive(Debug, Clone, Default)]
pub struct Case {
    pub id: String,
    pub params: BTreeMap<String, Param>,
}

impl Case {
    pub fn get(&self, fixture: &str) -> Option<&Param> {
        self.params.get(fixture)
    }

    /// `test_name[id]`, or the bare name for an unparametrized case
    pub fn test_name(&self, test: &str) -> String {
        if self.id.is_empty() {
            test.to_string()
        } else {
            format!("{}[{}]", test, self.id)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Parametrization {
    axes: Vec<(String, Vec<Param>)>,
}

impl Parametrization {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis; a fixture named twice keeps its latest values
    pub fn with(mut self, fixture: impl Into<String>, params: Vec<Param>) -> Self {
        let fixture = fixture.into();
        self.axes.retain(|(name, _)| *name != fixture);
        self.axes.push((fixture, params));
        self
    }

    /// Target either the route or the gateway, resolved indirectly
    pub fn route_or_gateway(self) -> Self {
        self.with(
            "target",
            vec![Param::indirect("route"), Param::indirect("gateway")],
        )
    }

    /// Place policy content in the `defaults` block, then the `overrides` block
    pub fn defaults_or_overrides(self) -> Self {
        self.with(
            "block",
            vec![
                Param::value("defaults", crate::policy::Block::Defaults),
                Param::value("overrides", crate::policy::Block::Overrides),
            ],
        )
    }

    /// Every combination, first axis varying slowest
    ///
    /// An empty parametrization yields a single empty case; an axis with no
    /// values yields no cases.
    pub fn cases(&self) -> Vec<Case> {
        let mut cases = vec![Case::default()];
        for (fixture, params) in &self.axes {
            cases = cases
                .into_iter()
                .flat_map(|case| {
                    params.iter().map(move |param| {
                        let mut next = case.clone();
                        if !next.id.is_empty() {
                            next.id.push('-');
                        }
                        next.id.push_str(param.id());
                        next.params.insert(fixture.clone(), param.clone());
                        next
                    })
                })
                .collect();
        }
        cases
    }
}
