//! # Structured Logging
//!
//! Subscriber setup for the harness binary and test runs, plus span macros
//! used around scenarios and fixture setup.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::settings::LoggingSettings;

/// Create a tracing span around one scenario run.
///
/// ```rust,ignore
/// let span = scenario_span!("rate_limit_resets", worker = "gw0");
/// ```
#[macro_export]
macro_rules! scenario_span {
    ($test:expr) => {
        ::tracing::info_span!(
            "scenario",
            test = %$test,
            run_id = %uuid::Uuid::new_v4()
        )
    };
    ($test:expr, $($field:tt)*) => {
        ::tracing::info_span!(
            "scenario",
            test = %$test,
            run_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for fixture setup or teardown.
#[macro_export]
macro_rules! fixture_span {
    ($fixture:expr, $scope:expr) => {
        ::tracing::debug_span!("fixture", fixture = %$fixture, scope = ?$scope)
    };
}

/// Directive string for the filter: `RUST_LOG` wins over the configured level
fn filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
}

/// Install the global subscriber
///
/// Returns `false` if a subscriber was already installed, which is expected
/// when several tests in one binary initialise logging.
pub fn init_logging(settings: &LoggingSettings) -> bool {
    let registry = tracing_subscriber::registry().with(filter(settings));
    let installed = if settings.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    installed.is_ok()
}
