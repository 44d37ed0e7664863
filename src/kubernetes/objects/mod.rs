//! Typed builders and helpers for the objects the harness creates.

pub mod cert_manager;
pub mod chaos;
pub mod config_map;
pub mod deployment;
pub mod hpa;
pub mod ingress;
pub mod monitoring;
pub mod route;
pub mod secret;
pub mod service;
pub mod service_account;

pub use cert_manager::{Issuer, IssuerRef};
pub use chaos::{pod_chaos, pod_chaos_committed, PodChaos, PodChaosRequest};
pub use deployment::{DeploymentBuilder, Rollout};
pub use monitoring::{MonitorRef, PodMonitor, ServiceMonitor};
pub use route::{Route, Termination};
pub use service::{ServicePort, ServiceType};
