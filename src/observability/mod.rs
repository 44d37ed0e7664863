//! # Observability
//!
//! Harness logging, clients for the metrics and trace backends the
//! components under test report to, and the failure artifact tree that log
//! collection writes into.

pub mod artifacts;
pub mod log_collection;
pub mod logging;
pub mod metrics;
pub mod tracing;

pub use artifacts::{worker_id, ArtifactLayout};
pub use log_collection::{default_components, CollectionReport, ComponentSelector, LogCollector};
pub use logging::init_logging;
pub use metrics::{Metrics, PollSchedule, PrometheusClient, Sample, Target};
pub use self::tracing::{Span, Trace, TracingClient};
