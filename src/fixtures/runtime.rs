//! Scope frames, fixture resolution, and teardown.
//!
//! The runtime keeps a stack of active scope frames, widest first. Resolving
//! a fixture builds its dependencies first, caches the value in the frame of
//! the fixture's scope, and gives the instance its own finalizer stack, which
//! sits in that frame's stack at the point the instance became ready. Exiting
//! a scope pops its frame and runs its finalizers in reverse registration
//! order.
//!
//! An instance is cached under its name plus the case parameters of every
//! parametrized fixture it depends on, directly or not. When the case moves
//! on, the stale instance and everything built on it are torn down before
//! the replacement is built.
//!
//! A fixture whose scope has no active frame lives in the nearest wider one:
//! a class-scoped fixture used outside any class is cached per module.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn, Instrument};

use super::finalizers::SharedFinalizers;
use super::params::{Case, FixtureValue, Param};
use super::registry::{check_cycle, check_scope, downcast, FixtureContext, FixtureDef, FixtureRegistry};
use super::scope::Scope;
use crate::errors::{Error, Result};

/// One built fixture instance
struct Instance {
    key: String,
    value: FixtureValue,
    /// Every fixture this instance was built from, directly or not
    uses: BTreeSet<String>,
    finalizers: SharedFinalizers,
    seq: u64,
}

struct Frame {
    scope: Scope,
    values: HashMap<String, Instance>,
    finalizers: SharedFinalizers,
}

impl Frame {
    fn new(scope: Scope) -> Self {
        Self {
            scope,
            values: HashMap::new(),
            finalizers: SharedFinalizers::new(),
        }
    }
}

#[derive(Default)]
struct State {
    frames: Vec<Frame>,
    case: Case,
    next_seq: u64,
}

impl State {
    /// Innermost frame that lives at least as long as `scope`
    fn frame_for(&self, scope: Scope) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| f.scope.contains(scope))
    }

    fn frame_for_mut(&mut self, scope: Scope) -> Option<&mut Frame> {
        self.frames.iter_mut().rev().find(|f| f.scope.contains(scope))
    }
}

pub struct FixtureRuntime {
    registry: Arc<FixtureRegistry>,
    state: Mutex<State>,
}

impl FixtureRuntime {
    pub fn new(registry: FixtureRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            state: Mutex::new(State::default()),
        }
    }

    /// Runtime with the session scope already entered
    pub async fn session(registry: FixtureRegistry) -> Result<Arc<Self>> {
        registry.validate()?;
        let runtime = Arc::new(Self::new(registry));
        runtime.enter(Scope::Session).await?;
        Ok(runtime)
    }

    pub fn registry(&self) -> &FixtureRegistry {
        &self.registry
    }

    /// Open a frame for `scope`, which must be narrower than the current one
    pub async fn enter(&self, scope: Scope) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(top) = state.frames.last() {
            if !top.scope.is_wider_than(scope) {
                return Err(Error::fixture(format!(
                    "cannot enter {} scope inside {} scope",
                    scope, top.scope
                )));
            }
        }
        debug!(%scope, "Entering scope");
        state.frames.push(Frame::new(scope));
        Ok(())
    }

    /// Close the innermost frame, which must be `scope`, and run its
    /// finalizers newest first
    ///
    /// Returns the number of finalizers that failed.
    pub async fn exit(&self, scope: Scope) -> Result<usize> {
        let frame = {
            let mut state = self.state.lock().await;
            match state.frames.last() {
                Some(top) if top.scope == scope => {}
                Some(top) => {
                    return Err(Error::fixture(format!(
                        "cannot exit {} scope while {} scope is active",
                        scope, top.scope
                    )))
                }
                None => return Err(Error::fixture(format!("no active {} scope", scope))),
            }
            state.frames.pop()
        };
        let Some(frame) = frame else {
            return Ok(0);
        };
        debug!(%scope, finalizers = frame.finalizers.len(), "Exiting scope");
        Ok(frame.finalizers.run_all().await)
    }

    /// Close every open frame, innermost first
    pub async fn exit_all(&self) -> usize {
        let mut failed = 0;
        loop {
            let frame = self.state.lock().await.frames.pop();
            match frame {
                Some(frame) => failed += frame.finalizers.run_all().await,
                None => return failed,
            }
        }
    }

    pub async fn active_scopes(&self) -> Vec<Scope> {
        self.state.lock().await.frames.iter().map(|f| f.scope).collect()
    }

    /// Select the parameters for the next test
    pub async fn set_case(&self, case: Case) {
        self.state.lock().await.case = case;
    }

    pub async fn case(&self) -> Case {
        self.state.lock().await.case.clone()
    }

    /// Finalizers of the frame `scope` values live in
    pub async fn finalizers(&self, scope: Scope) -> Result<SharedFinalizers> {
        self.state
            .lock()
            .await
            .frame_for(scope)
            .map(|f| f.finalizers.clone())
            .ok_or_else(|| Error::fixture(format!("no active {} scope", scope)))
    }

    /// Value of fixture `name`, built on first use within its scope
    pub async fn resolve<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let value = self.resolve_value(name.to_string(), Vec::new()).await?;
        downcast(value, name)
    }

    /// A test-level parameter of the current case
    ///
    /// Indirect parameters resolve the fixture they name.
    pub async fn param<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        let param = self.state.lock().await.case.get(name).cloned();
        match param {
            Some(Param::Value { value, id }) => downcast(value, &id),
            Some(Param::Indirect(fixture)) => self.resolve(&fixture).await,
            None => Err(Error::fixture(format!("case has no parameter '{}'", name))),
        }
    }

    async fn param_for(&self, def: &FixtureDef) -> Result<Option<Param>> {
        let chosen = self.state.lock().await.case.get(&def.name).cloned();
        match chosen {
            Some(param) => Ok(Some(param)),
            None if def.params.is_empty() => Ok(None),
            None => Err(Error::fixture(format!(
                "fixture '{}' is parametrized but the case gives it no value",
                def.name
            ))),
        }
    }

    /// Fixtures `name` is built from under the current case, and the
    /// parameter ids the parametrized ones among them take
    fn lineage(&self, name: &str, case: &Case) -> Result<(BTreeSet<String>, BTreeMap<String, String>)> {
        let mut uses = BTreeSet::new();
        let mut params = BTreeMap::new();
        let mut pending = vec![name.to_string()];
        while let Some(next) = pending.pop() {
            if !uses.insert(next.clone()) {
                continue;
            }
            if let Some(param) = case.get(&next) {
                params.insert(next.clone(), param.id().to_string());
                if let Param::Indirect(fixture) = param {
                    pending.push(fixture.clone());
                }
            }
            pending.extend(self.registry.get(&next)?.deps.iter().cloned());
        }
        uses.remove(name);
        Ok((uses, params))
    }

    /// Tear down every cached instance of `name` and everything built on it,
    /// newest first
    async fn invalidate(&self, name: &str) -> usize {
        let mut stale = {
            let mut state = self.state.lock().await;
            let mut stale = Vec::new();
            for frame in state.frames.iter_mut() {
                let names: Vec<String> = frame
                    .values
                    .iter()
                    .filter(|(cached, instance)| cached.as_str() == name || instance.uses.contains(name))
                    .map(|(cached, _)| cached.clone())
                    .collect();
                stale.extend(names.iter().filter_map(|cached| frame.values.remove(cached)));
            }
            stale
        };
        stale.sort_by(|a, b| b.seq.cmp(&a.seq));

        let mut failed = 0;
        for instance in stale {
            debug!(fixture = %instance.key, "Tearing down stale fixture");
            failed += instance.finalizers.run_all().await;
        }
        if failed > 0 {
            warn!(fixture = name, failed, "Some finalizers of replaced fixtures failed");
        }
        failed
    }

    fn resolve_value(&self, name: String, path: Vec<String>) -> BoxFuture<'_, Result<FixtureValue>> {
        Box::pin(async move {
            check_cycle(&path, &name)?;
            let def = self.registry.get(&name)?.clone();
            let param = self.param_for(&def).await?;
            let (uses, params) = {
                let case = self.state.lock().await.case.clone();
                self.lineage(&name, &case)?
            };
            let key = if params.is_empty() {
                name.clone()
            } else {
                let ids: Vec<String> = params.iter().map(|(f, id)| format!("{}={}", f, id)).collect();
                format!("{}[{}]", name, ids.join(","))
            };

            let stale = {
                let state = self.state.lock().await;
                let frame = state.frame_for(def.scope).ok_or_else(|| {
                    Error::fixture(format!("no active {} scope for fixture '{}'", def.scope, name))
                })?;
                match frame.values.get(&name) {
                    Some(instance) if instance.key == key => return Ok(instance.value.clone()),
                    Some(_) => true,
                    None => false,
                }
            };
            if stale {
                self.invalidate(&name).await;
            }

            let mut path = path;
            path.push(name.clone());

            let mut deps = HashMap::new();
            for dep in &def.deps {
                check_scope(&def, self.registry.get(dep)?)?;
                let value = self.resolve_value(dep.clone(), path.clone()).await?;
                deps.insert(dep.clone(), value);
            }

            let param = match param {
                None => None,
                Some(Param::Value { id, value }) => Some((id, value)),
                Some(Param::Indirect(fixture)) => {
                    check_scope(&def, self.registry.get(&fixture)?)?;
                    let value = self.resolve_value(fixture.clone(), path.clone()).await?;
                    Some((fixture, value))
                }
            };

            let finalizers = SharedFinalizers::new();
            let ctx = FixtureContext::new(&name, def.scope, deps, param, finalizers.clone());
            let built = def
                .build(ctx)
                .instrument(crate::fixture_span!(name, def.scope))
                .await;

            // Whatever the factory registered is torn down with the frame,
            // even when the factory failed halfway
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            let Some(frame) = state.frame_for_mut(def.scope) else {
                drop(state);
                finalizers.run_all().await;
                return Err(Error::fixture(format!(
                    "{} scope closed while building fixture '{}'",
                    def.scope, name
                )));
            };
            frame.finalizers.push_nested(format!("teardown {}", key), finalizers.clone());
            let value = built?;
            info!(fixture = %key, scope = %def.scope, "Fixture ready");
            frame.values.insert(
                name,
                Instance {
                    key,
                    value: value.clone(),
                    uses,
                    finalizers,
                    seq,
                },
            );
            Ok(value)
        })
    }
}

impl std::fmt::Debug for FixtureRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureRuntime")
            .field("fixtures", &self.registry.names().collect::<Vec<_>>())
            .finish()
    }
}
