//! # Kuadrant Testsuite
//!
//! End-to-end test harness for the Kuadrant API-gateway security stack:
//! authentication and authorization (Authorino), rate limiting (Limitador),
//! and DNS/TLS policies on Gateway API gateways.
//!
//! ## Architecture
//!
//! ```text
//! config ──▶ fixtures ──▶ oidc / gateway / policy ──▶ kubernetes ──▶ cluster
//!                │                                        ▲
//!                └──▶ httpx (requests against the exposed hostname)
//!                └──▶ observability (metrics, traces, failure logs)
//! ```
//!
//! ## Core Components
//!
//! - **Cluster client and resources** ([`kubernetes`]): namespace-bound
//!   client plus a generic commit/modify/delete/wait wrapper over objects
//! - **Gateways** ([`gateway`]): Gateway API and standalone Envoy gateways,
//!   routes, exposers, hostnames, and backends
//! - **Policies** ([`policy`]): AuthPolicy, RateLimitPolicy, and the other
//!   Kuadrant policy kinds with typed builders
//! - **Identity providers** ([`oidc`]): Keycloak and Auth0 token sources
//! - **HTTP client** ([`httpx`]): retrying client whose transport errors are
//!   assertable data
//! - **Fixtures** ([`fixtures`]): scoped fixture graph with LIFO teardown
//! - **Observability** ([`observability`]): logging, Prometheus and tracing
//!   clients, failure log collection

pub mod cli;
pub mod config;
pub mod errors;
pub mod fixtures;
pub mod gateway;
pub mod httpx;
pub mod kubernetes;
pub mod observability;
pub mod oidc;
pub mod policy;
pub mod utils;

// Re-export commonly used types and traits
pub use config::{HarnessConfig, Settings};
pub use errors::{Error, Result};
pub use kubernetes::{ClusterClient, ClusterOptions, Lifecycle, Resource};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
