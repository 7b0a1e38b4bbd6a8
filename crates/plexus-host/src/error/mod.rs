//! Errors raised by plugin lifecycle operations.
//!
//! [`PluginError`] carries structured context for every way attaching to or
//! talking with a plugin can fail. [`AppError`] is the shape returned by the
//! host's public lifecycle operations: an operation name, a stable code, a
//! status classification and the wrapped [`PluginError`] when there is one.

use std::fmt;

use plexus_plugin::transport::TransportError;
use plexus_plugin::wire::WireError;
use plexus_plugin::{HandshakeError, HookId, RpcError};
use thiserror::Error;

/// Code reported when the plugin subsystem is switched off.
pub const PLUGIN_DISABLED: &str = "app.plugin.disabled.app_error";

/// Code reported when reattaching a plugin fails.
pub const PLUGIN_REATTACH_FAILED: &str = "app.plugin.reattach.app_error";

/// Errors arising from plugin lifecycle operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// No plugin with this identifier is registered.
    #[error("plugin '{id}' is not registered")]
    NotFound {
        /// Identifier that was looked up.
        id: String,
    },

    /// The manifest failed validation.
    #[error("manifest error: {message}")]
    Manifest {
        /// Description of the validation failure.
        message: String,
    },

    /// A live session already exists for the identifier.
    #[error("plugin '{id}' is already attached")]
    AlreadyAttached {
        /// Plugin identifier.
        id: String,
    },

    /// The declared plugin process does not exist.
    #[error("plugin '{id}' process {pid} is not running")]
    ProcessNotRunning {
        /// Plugin identifier.
        id: String,
        /// Process id from the reattach descriptor.
        pid: u32,
    },

    /// The descriptor asks for a protocol version this host does not speak.
    #[error("plugin '{id}' speaks protocol {found}, expected {expected}")]
    UnsupportedProtocol {
        /// Plugin identifier.
        id: String,
        /// Version this host speaks.
        expected: u32,
        /// Version in the descriptor.
        found: u32,
    },

    /// The descriptor asks for a transport this host cannot provide.
    #[error("plugin '{id}' requires an unsupported transport: {reason}")]
    UnsupportedTransport {
        /// Plugin identifier.
        id: String,
        /// What was requested.
        reason: String,
    },

    /// Connecting to the plugin failed.
    #[error("failed to connect to plugin '{id}': {source}")]
    Transport {
        /// Plugin identifier.
        id: String,
        /// Underlying socket error.
        #[source]
        source: TransportError,
    },

    /// Reading or writing the session connection failed.
    #[error("connection to plugin '{id}' failed: {source}")]
    Wire {
        /// Plugin identifier.
        id: String,
        /// Underlying frame error.
        #[source]
        source: WireError,
    },

    /// An operation did not finish within its bound.
    #[error("plugin '{id}' {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Plugin identifier.
        id: String,
        /// What was being waited for.
        operation: &'static str,
        /// The bound that elapsed.
        timeout_ms: u64,
    },

    /// The plugin presented a mismatching handshake descriptor.
    #[error("handshake with plugin '{id}' failed: {source}")]
    Handshake {
        /// Plugin identifier.
        id: String,
        /// Which field disagreed.
        #[source]
        source: HandshakeError,
    },

    /// The plugin refused our handshake descriptor.
    #[error("plugin '{id}' rejected the handshake: {reason}")]
    Rejected {
        /// Plugin identifier.
        id: String,
        /// Reason given by the plugin.
        reason: String,
    },

    /// The plugin broke the session protocol.
    #[error("plugin '{id}' violated the session protocol: {message}")]
    Protocol {
        /// Plugin identifier.
        id: String,
        /// Description of the violation.
        message: String,
    },

    /// The plugin did not report the hook being invoked.
    #[error("plugin '{id}' does not implement {hook}")]
    HookNotImplemented {
        /// Plugin identifier.
        id: String,
        /// Hook that was requested.
        hook: HookId,
    },

    /// A hook call over an established session failed.
    #[error("hook {hook} on plugin '{id}' failed: {source}")]
    Hook {
        /// Plugin identifier.
        id: String,
        /// Hook that was invoked.
        hook: HookId,
        /// Underlying call error.
        #[source]
        source: RpcError,
    },

    /// The plugin's activation hook failed; the session was discarded.
    #[error("plugin '{id}' failed to activate: {source}")]
    Activation {
        /// Plugin identifier.
        id: String,
        /// Why activation failed.
        #[source]
        source: Box<PluginError>,
    },
}

impl PluginError {
    /// Whether the failure happened while reaching or handshaking with the
    /// plugin process, as opposed to inside an established session.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ProcessNotRunning { .. }
                | Self::UnsupportedProtocol { .. }
                | Self::UnsupportedTransport { .. }
                | Self::Transport { .. }
                | Self::Wire { .. }
                | Self::Timeout { .. }
                | Self::Handshake { .. }
                | Self::Rejected { .. }
                | Self::Protocol { .. }
        )
    }
}

/// HTTP-like classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation failed inside the host (500).
    Internal,
    /// The feature is switched off (501).
    NotImplemented,
}

impl ErrorClass {
    /// Numeric status code.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::Internal => 500,
            Self::NotImplemented => 501,
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

/// Error returned by host-level plugin operations.
#[derive(Debug, Error)]
#[error("{operation}: {code} ({class}): {detail}")]
pub struct AppError {
    operation: &'static str,
    code: &'static str,
    class: ErrorClass,
    detail: String,
    #[source]
    source: Option<Box<PluginError>>,
}

impl AppError {
    /// Creates an error without a wrapped cause.
    #[must_use]
    pub fn new(
        operation: &'static str,
        code: &'static str,
        class: ErrorClass,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            code,
            class,
            detail: detail.into(),
            source: None,
        }
    }

    /// Attaches the underlying plugin error.
    #[must_use]
    pub fn with_source(mut self, source: PluginError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Name of the failed operation.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Status classification.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.class
    }

    /// Numeric status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.class.status()
    }

    /// Free-form detail.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }

    /// The wrapped plugin error, if any.
    #[must_use]
    pub fn plugin_error(&self) -> Option<&PluginError> {
        self.source.as_deref()
    }

    /// Whether the wrapped cause is a transport or handshake failure.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        self.source.as_deref().is_some_and(PluginError::is_transport)
    }
}

#[cfg(test)]
mod tests;
