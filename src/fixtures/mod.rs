//! # Fixtures
//!
//! Scope-aware fixture composition for scenarios: fixtures declare a scope
//! and their dependencies, the runtime builds each once per scope instance
//! and tears everything down last-in first-out when the scope exits.
//!
//! ```rust,ignore
//! let registry = FixtureRegistry::new()
//!     .with(FixtureDef::new("backend", Scope::Module, |ctx| async move { ... }))
//!     .with(FixtureDef::new("route", Scope::Module, |ctx| async move { ... }).depends_on(["backend"]));
//! let runner = TestRunner::new(FixtureRuntime::session(registry).await?);
//! runner
//!     .run_test(TestMeta::new("test_auth").log_components(["authorino"]), |rt| async move {
//!         let route = rt.resolve::<HttpRoute>("route").await?;
//!         Ok(())
//!     })
//!     .await
//!     .assert_passed();
//! ```

pub mod blame;
pub mod commit;
pub mod finalizers;
pub mod markers;
pub mod params;
pub mod registry;
pub mod run;
pub mod runtime;
pub mod scope;

pub use blame::Blame;
pub use commit::commit_all;
pub use finalizers::{Finalizers, SharedFinalizers};
pub use markers::{Marker, MarkerFilter};
pub use params::{Case, FixtureValue, Param, Parametrization};
pub use registry::{FixtureContext, FixtureDef, FixtureRegistry};
pub use run::{TestMeta, TestOutcome, TestRunner};
pub use runtime::FixtureRuntime;
pub use scope::Scope;
