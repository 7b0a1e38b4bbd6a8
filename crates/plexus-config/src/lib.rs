//! Shared configuration for the Plexus host and plugin SDK.
//!
//! [`Config`] is assembled by `ortho_config` from built-in defaults, an
//! optional TOML file (`--config-path` or `PLEXUS_CONFIG_PATH`), `PLEXUS_*`
//! environment variables, and command-line flags, in increasing order of
//! precedence. The crate also owns the [`SocketEndpoint`] type used to
//! describe where a plugin process listens.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use self::defaults::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS, DEFAULT_LOG_FILTER,
    PLUGIN_ENDPOINT_ENV_VAR, default_call_timeout, default_handshake_timeout, default_log_filter,
    default_log_filter_string, default_log_format, default_plugin_endpoint,
};
pub use self::logging::{LogFormat, LogFormatParseError};
pub use self::socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Runtime configuration for the plugin host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "PLEXUS")]
pub struct Config {
    /// Master switch for the plugin subsystem. When `false` the host exposes
    /// no plugin environment and every lifecycle operation is refused.
    #[ortho_config(default = true)]
    pub plugins_enabled: bool,
    /// `tracing` filter expression applied to the host's log output.
    #[ortho_config(default = defaults::default_log_filter_string())]
    pub log_filter: String,
    /// Output format of the host's log subscriber.
    #[ortho_config(default = defaults::default_log_format())]
    pub log_format: LogFormat,
    /// Upper bound on connecting to a plugin and completing the handshake.
    #[ortho_config(default = DEFAULT_HANDSHAKE_TIMEOUT_MS)]
    pub handshake_timeout_ms: u64,
    /// Upper bound on a single hook call.
    #[ortho_config(default = DEFAULT_CALL_TIMEOUT_MS)]
    pub call_timeout_ms: u64,
    /// Manifest of a plugin to reattach at start-up.
    pub reattach_manifest: Option<Utf8PathBuf>,
    /// Reattach descriptor printed by the running plugin process.
    pub reattach_descriptor: Option<Utf8PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugins_enabled: true,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            reattach_manifest: None,
            reattach_descriptor: None,
        }
    }
}

impl Config {
    /// Whether the plugin subsystem is enabled.
    #[must_use]
    pub const fn plugins_enabled(&self) -> bool {
        self.plugins_enabled
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Handshake timeout as a [`Duration`].
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Hook call timeout as a [`Duration`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Manifest and descriptor paths for a start-up reattach, when both are
    /// configured.
    #[must_use]
    pub fn startup_reattach(&self) -> Option<(&Utf8PathBuf, &Utf8PathBuf)> {
        self.reattach_manifest
            .as_ref()
            .zip(self.reattach_descriptor.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_enables_plugins() {
        let config = Config::default();
        assert!(config.plugins_enabled());
        assert_eq!(config.log_filter(), DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn timeouts_convert_to_durations() {
        let config = Config {
            handshake_timeout_ms: 250,
            call_timeout_ms: 1_500,
            ..Config::default()
        };
        assert_eq!(config.handshake_timeout(), Duration::from_millis(250));
        assert_eq!(config.call_timeout(), Duration::from_millis(1_500));
    }

    #[test]
    fn startup_reattach_requires_both_paths() {
        let mut config = Config {
            reattach_manifest: Some(Utf8PathBuf::from("/etc/plexus/echo.json")),
            ..Config::default()
        };
        assert!(config.startup_reattach().is_none());

        config.reattach_descriptor = Some(Utf8PathBuf::from("/run/plexus/echo.reattach"));
        assert!(config.startup_reattach().is_some());
    }
}
