//! # HTTP test client
//!
//! Client used by scenarios to send traffic through gateways. Unlike the
//! backend API helpers in `utils::http`, failures here are observations:
//! DNS and TLS errors come back inside [`Response`] with classification
//! predicates, and 401/403/429 are just statuses.

pub mod auth;
pub mod client;
pub mod response;

pub use auth::{ApiKeyAuth, Authenticator, OidcAuth, Placement};
pub use client::{HttpClient, HttpClientBuilder, RequestOptions, RetryPolicy};
pub use response::{Response, ResponseBatch};
