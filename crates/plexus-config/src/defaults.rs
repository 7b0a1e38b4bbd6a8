use std::time::Duration;

use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default bound on connecting to a plugin and completing the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Default bound on a single hook call over an established session.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Environment variable naming the endpoint a served plugin binds to.
pub const PLUGIN_ENDPOINT_ENV_VAR: &str = "PLEXUS_PLUGIN_ENDPOINT";

/// Default log filter expression used by the binaries.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
#[must_use]
pub const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default handshake timeout as a [`Duration`].
#[must_use]
pub const fn default_handshake_timeout() -> Duration {
    Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS)
}

/// Default hook call timeout as a [`Duration`].
#[must_use]
pub const fn default_call_timeout() -> Duration {
    Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS)
}

/// Endpoint a plugin binds when none is configured: loopback TCP with an
/// ephemeral port.
#[must_use]
pub fn default_plugin_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
}
