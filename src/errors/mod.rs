//! # Error Handling
//!
//! Error kinds for the harness: control-plane, timeout, conflict, transport,
//! and configuration failures, plus the classification used by the HTTP test
//! client to turn DNS and TLS failures into assertable predicates.

pub mod transport;
pub mod types;

pub use transport::{TransportError, TransportErrorKind};
pub use types::{Error, Result};
