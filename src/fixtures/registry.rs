//! Fixture declarations: name, scope, dependencies, and a factory.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::finalizers::SharedFinalizers;
use super::params::{FixtureValue, Param, Parametrization};
use super::scope::Scope;
use crate::errors::{Error, Result};
use crate::kubernetes::Lifecycle;

pub type Factory = Arc<dyn Fn(FixtureContext) -> BoxFuture<'static, Result<FixtureValue>> + Send + Sync>;

/// Declaration of one fixture
#[derive(Clone)]
pub struct FixtureDef {
    pub name: String,
    pub scope: Scope,
    pub deps: Vec<String>,
    /// Values this fixture takes when the case does not pick one
    pub params: Vec<Param>,
    factory: Factory,
}

impl FixtureDef {
    pub fn new<F, Fut, T>(name: impl Into<String>, scope: Scope, factory: F) -> Self
    where
        F: Fn(FixtureContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Any + Send + Sync,
    {
        let factory: Factory = Arc::new(move |ctx| {
            let fut = factory(ctx);
            Box::pin(async move { fut.await.map(|value| Arc::new(value) as FixtureValue) })
        });
        Self {
            name: name.into(),
            scope,
            deps: Vec::new(),
            params: Vec::new(),
            factory,
        }
    }

    /// Like [`FixtureDef::new`] for factories that keep a handle on their
    /// value, e.g. to register its deletion
    pub fn shared<F, Fut, T>(name: impl Into<String>, scope: Scope, factory: F) -> Self
    where
        F: Fn(FixtureContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<T>>> + Send + 'static,
        T: Any + Send + Sync,
    {
        let factory: Factory = Arc::new(move |ctx| {
            let fut = factory(ctx);
            Box::pin(async move { fut.await.map(|value| value as FixtureValue) })
        });
        Self {
            name: name.into(),
            scope,
            deps: Vec::new(),
            params: Vec::new(),
            factory,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    pub(crate) fn build(&self, ctx: FixtureContext) -> BoxFuture<'static, Result<FixtureValue>> {
        (self.factory)(ctx)
    }
}

impl fmt::Debug for FixtureDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixtureDef")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("deps", &self.deps)
            .field("params", &self.params)
            .finish()
    }
}

/// What a factory sees: its resolved dependencies, its parameter, and the
/// finalizers of the scope frame it lives in
pub struct FixtureContext {
    name: String,
    scope: Scope,
    deps: HashMap<String, FixtureValue>,
    param: Option<(String, FixtureValue)>,
    finalizers: SharedFinalizers,
}

impl FixtureContext {
    pub(crate) fn new(
        name: &str,
        scope: Scope,
        deps: HashMap<String, FixtureValue>,
        param: Option<(String, FixtureValue)>,
        finalizers: SharedFinalizers,
    ) -> Self {
        Self {
            name: name.to_string(),
            scope,
            deps,
            param,
            finalizers,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// A declared dependency's value
    pub fn get<T: Any + Send + Sync>(&self, dep: &str) -> Result<Arc<T>> {
        let value = self.deps.get(dep).ok_or_else(|| {
            Error::fixture(format!("fixture '{}' did not declare dependency '{}'", self.name, dep))
        })?;
        downcast(value.clone(), dep)
    }

    /// The parameter this instance was built for
    pub fn param<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let (id, value) = self
            .param
            .as_ref()
            .ok_or_else(|| Error::fixture(format!("fixture '{}' is not parametrized", self.name)))?;
        downcast(value.clone(), id)
    }

    pub fn param_id(&self) -> Option<&str> {
        self.param.as_ref().map(|(id, _)| id.as_str())
    }

    pub fn add_finalizer<F>(&self, label: impl Into<String>, callback: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.finalizers.push(label, callback);
    }

    /// Delete `resource` when this fixture's scope ends
    pub fn add_delete(&self, resource: Arc<dyn Lifecycle>) {
        self.finalizers.push_delete(resource);
    }

    pub fn finalizers(&self) -> &SharedFinalizers {
        &self.finalizers
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(value: FixtureValue, name: &str) -> Result<Arc<T>> {
    value.downcast::<T>().map_err(|_| {
        Error::fixture(format!(
            "value of '{}' is not a {}",
            name,
            std::any::type_name::<T>()
        ))
    })
}

#[derive(Debug, Clone, Default)]
pub struct FixtureRegistry {
    defs: BTreeMap<String, FixtureDef>,
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fixture; a later registration under the same name replaces the
    /// earlier one, the way a narrower conftest overrides a wider one
    pub fn register(&mut self, def: FixtureDef) -> &mut Self {
        if self.defs.contains_key(&def.name) {
            debug!(fixture = %def.name, "Overriding fixture");
        }
        self.defs.insert(def.name.clone(), def);
        self
    }

    pub fn with(mut self, def: FixtureDef) -> Self {
        self.register(def);
        self
    }

    pub fn get(&self, name: &str) -> Result<&FixtureDef> {
        self.defs
            .get(name)
            .ok_or_else(|| Error::fixture(format!("unknown fixture '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.defs.keys().map(String::as_str)
    }

    /// Check the whole graph: every dependency exists, no fixture depends on
    /// a narrower one, and there are no cycles
    pub fn validate(&self) -> Result<()> {
        for def in self.defs.values() {
            for dep in &def.deps {
                check_scope(def, self.get(dep)?)?;
            }
        }
        self.setup_order(self.defs.keys().map(String::as_str))
            .map(|_| ())
    }

    /// Construction order for `roots` and everything they depend on
    ///
    /// Dependencies come before dependents; otherwise roots keep their order.
    pub fn setup_order<'a, I>(&self, roots: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut order = Vec::new();
        for root in roots {
            self.visit(root, &mut Vec::new(), &mut order)?;
        }
        Ok(order)
    }

    /// Axes for every fixture under `roots` that declares its own params
    pub fn parametrization<'a, I>(&self, roots: I) -> Result<Parametrization>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut parametrization = Parametrization::new();
        for name in self.setup_order(roots)? {
            let def = self.get(&name)?;
            if !def.params.is_empty() {
                parametrization = parametrization.with(name.as_str(), def.params.clone());
            }
        }
        Ok(parametrization)
    }

    fn visit(&self, name: &str, path: &mut Vec<String>, order: &mut Vec<String>) -> Result<()> {
        if order.iter().any(|done| done == name) {
            return Ok(());
        }
        check_cycle(path, name)?;
        let def = self.get(name)?;
        path.push(name.to_string());
        for dep in &def.deps {
            self.visit(dep, path, order)?;
        }
        path.pop();
        order.push(name.to_string());
        Ok(())
    }
}

pub(crate) fn check_cycle(path: &[String], name: &str) -> Result<()> {
    if path.iter().any(|seen| seen == name) {
        let mut cycle = path.to_vec();
        cycle.push(name.to_string());
        return Err(Error::fixture(format!(
            "fixture dependency cycle: {}",
            cycle.join(" -> ")
        )));
    }
    Ok(())
}

/// A fixture may only use fixtures that live at least as long as it does
pub(crate) fn check_scope(def: &FixtureDef, dep: &FixtureDef) -> Result<()> {
    if dep.scope.contains(def.scope) {
        Ok(())
    } else {
        Err(Error::fixture(format!(
            "{}-scoped fixture '{}' cannot depend on {}-scoped fixture '{}'",
            def.scope, def.name, dep.scope, dep.name
        )))
    }
}
