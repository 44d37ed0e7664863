//! Cluster scenarios
//!
//! Every test here drives a live cluster with the Kuadrant operators
//! installed and is ignored by default.
//!
//! ## Running Tests
//!
//! ```bash
//! # All scenarios, one at a time
//! cargo test --test e2e -- --ignored --test-threads=1
//!
//! # Only authorization scenarios against the `ci` settings section
//! KUADRANT_ENV=ci KUADRANT_MARKERS=authorino cargo test --test e2e -- --ignored
//! ```
//!
//! Settings come from `config/settings.yaml` and `KUADRANT_*` variables;
//! failure logs land under `test-failures/<worker>/<test>/`.

#[path = "e2e/common/mod.rs"]
pub mod common;

#[path = "e2e/auth.rs"]
mod auth;

#[path = "e2e/rate_limit.rs"]
mod rate_limit;

#[path = "e2e/token_rate_limit.rs"]
mod token_rate_limit;

#[path = "e2e/wildcard_hosts.rs"]
mod wildcard_hosts;

#[path = "e2e/route_deletion.rs"]
mod route_deletion;

#[path = "e2e/log_collection.rs"]
mod log_collection;
