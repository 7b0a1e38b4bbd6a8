//! Log output for the host process.
//!
//! Every host event carries a target under `plexus-host`, so `log_filter`
//! can single out one concern:
//!
//! - `plexus-host::registry` and `plexus-host::session` for attach and
//!   teardown of plugin sessions;
//! - `plexus-host::plugin_api` for messages plugins forward through
//!   `Api::log`, tagged with the plugin id;
//! - `plexus-host::health` for the lifecycle events of the health reporter.
//!
//! Thread names are kept because each session reads on its own
//! `plexus-session-<id>` thread.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use plexus_config::{Config, LogFormat};

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Proof that host logging is installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Reasons host logging could not be installed.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression does not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Another global subscriber is already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Sends host logs to stderr in the configured format, once per process.
///
/// Only the first call reads `config`. Later calls, such as a second
/// bootstrap in the same test binary, return a handle and leave the
/// installed subscriber alone.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the filter is invalid or another
/// subscriber was installed outside this function.
///
/// # Examples
///
/// ```rust
/// use plexus_config::Config;
/// use plexus_host::telemetry;
///
/// # fn main() -> Result<(), plexus_host::TelemetryError> {
/// let config = Config::default();
/// let first = telemetry::initialise(&config)?;
/// let second = telemetry::initialise(&config)?;
/// drop((first, second));
/// # Ok(())
/// # }
/// ```
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(config))
        .map(|_| TelemetryHandle)
}

fn install_subscriber(config: &Config) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(config.log_filter())
        .map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |env_filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
            .with_timer(fmt::time::UtcTime::rfc_3339())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.log_format() {
        LogFormat::Json => Box::new(builder(filter).json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_concern_filters_parse() {
        let filter =
            EnvFilter::try_new("warn,plexus-host::plugin_api=debug,plexus-host::session=info");

        assert!(filter.is_ok(), "got {filter:?}");
    }

    #[test]
    fn invalid_filters_are_reported() {
        let config = Config {
            log_filter: String::from("plexus=notalevel"),
            ..Config::default()
        };

        let result = install_subscriber(&config);

        assert!(matches!(result, Err(TelemetryError::Filter(_))), "got {result:?}");
    }
}
