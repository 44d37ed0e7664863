//! # Error Types
//!
//! Error kinds surfaced by the harness, built with `thiserror`.
//!
//! Wait timeouts are deliberately *not* represented here as a failure path:
//! every `wait_*` operation returns `bool` and leaves the decision to the
//! caller. `Error::Timeout` is reserved for hard deadlines (a control-plane
//! verb or log stream that never returned).

use super::transport::TransportErrorKind;

/// Custom result type for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the test harness
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Non-zero verb exit or API error from the control plane
    #[error("Control plane error: {context}")]
    ControlPlane {
        context: String,
        code: Option<u16>,
        reason: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Hard deadline exceeded
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    /// Optimistic-concurrency retries exhausted
    #[error("Conflict on {kind} '{name}' after {attempts} attempts")]
    Conflict {
        kind: String,
        name: String,
        attempts: u32,
    },

    /// DNS, TLS, or socket failure outside the test HTTP client
    #[error("Transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },

    /// Missing or invalid configuration
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// YAML documents
    #[error("YAML error: {context}")]
    Yaml {
        #[source]
        source: serde_yaml::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Identity provider admin or token endpoint failures
    #[error("Identity provider error: {message} (status: {status:?})")]
    IdentityProvider { message: String, status: Option<u16> },

    /// Backend HTTP API (metrics, tracing, mockserver) returned something unusable
    #[error("HTTP error: {message} (status: {status})")]
    Http { message: String, status: u16 },

    /// Fixture graph misuse: cycles, scope mismatches, missing definitions
    #[error("Fixture error: {0}")]
    Fixture(String),

    /// A skip-or-fail fixture decided to skip
    #[error("Skipped: {0}")]
    Skipped(String),
}

impl Error {
    /// Create a control-plane error without an underlying API error
    pub fn control_plane<S: Into<String>>(context: S) -> Self {
        Self::ControlPlane {
            context: context.into(),
            code: None,
            reason: None,
            source: None,
        }
    }

    /// Wrap a `kube::Error`, keeping the API status code and reason
    pub fn kube<S: Into<String>>(context: S, error: kube::Error) -> Self {
        let (code, reason) = match &error {
            kube::Error::Api(response) => (Some(response.code), Some(response.reason.clone())),
            _ => (None, None),
        };
        Self::ControlPlane {
            context: context.into(),
            code,
            reason,
            source: Some(Box::new(error)),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Configuration {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Create a conflict error
    pub fn conflict<K: Into<String>, N: Into<String>>(kind: K, name: N, attempts: u32) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            attempts,
        }
    }

    /// Create an identity-provider error
    pub fn identity<S: Into<String>>(message: S, status: Option<u16>) -> Self {
        Self::IdentityProvider {
            message: message.into(),
            status,
        }
    }

    /// Create an HTTP error
    pub fn http<S: Into<String>>(message: S, status: u16) -> Self {
        Self::Http {
            message: message.into(),
            status,
        }
    }

    /// Create a fixture error
    pub fn fixture<S: Into<String>>(message: S) -> Self {
        Self::Fixture(message.into())
    }

    /// Create a skip
    pub fn skipped<S: Into<String>>(reason: S) -> Self {
        Self::Skipped(reason.into())
    }

    /// API status code of a control-plane error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::ControlPlane { code, .. } => *code,
            Error::IdentityProvider { status, .. } => *status,
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for control-plane `NotFound` responses
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404) && matches!(self, Error::ControlPlane { .. })
    }

    /// True for optimistic-concurrency rejections and exhausted retries
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::ControlPlane { code, .. } => *code == Some(409),
            _ => false,
        }
    }

    /// True if the caller may retry the operation
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ControlPlane { code, .. } => {
                matches!(code, Some(409) | Some(429) | Some(500..=504))
            }
            Error::Timeout { .. } => true,
            Error::Transport { kind, .. } => {
                matches!(kind, TransportErrorKind::ConnectionReset | TransportErrorKind::Timeout)
            }
            Error::Io { .. } => true,
            _ => false,
        }
    }

    /// True if this error should turn into a skip when raised inside a
    /// skip-or-fail fixture
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::Skipped(_))
    }

    /// Prefix the context string of errors that carry one
    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        let context = context.into();
        match &mut self {
            Error::ControlPlane { context: ctx, .. }
            | Error::Serialization { context: ctx, .. }
            | Error::Yaml { context: ctx, .. }
            | Error::Io { context: ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            Error::Configuration { message, .. } => {
                *message = format!("{}: {}", context, message);
            }
            _ => {}
        }
        self
    }
}

impl From<kube::Error> for Error {
    fn from(error: kube::Error) -> Self {
        Self::kube("Kubernetes API call failed", error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io {
            source: error,
            context: "I/O operation failed".to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            source: error,
            context: "JSON serialization failed".to_string(),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Self::Yaml {
            source: error,
            context: "YAML serialization failed".to_string(),
        }
    }
}

impl From<config::ConfigError> for Error {
    fn from(error: config::ConfigError) -> Self {
        Self::config_with_source("Configuration loading failed", Box::new(error))
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        let kind = super::transport::classify_error(&error);
        Self::Transport {
            kind,
            message: error.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::config(format!("Validation failed: {}", message))
    }
}
