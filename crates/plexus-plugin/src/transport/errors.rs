//! Error types for plugin socket operations.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced while binding, accepting, or connecting sockets.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Host name resolution failed.
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        /// Host that was resolved.
        host: String,
        /// Port that was resolved.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Resolution produced no usable address.
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty {
        /// Host that was resolved.
        host: String,
        /// Port that was resolved.
        port: u16,
    },
    /// Binding the TCP listener failed.
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        /// Address that was bound.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The listener could not be switched to non-blocking mode.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Reading the bound address back failed.
    #[error("failed to read listener address: {source}")]
    LocalAddr {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Connecting to a plugin endpoint failed.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint that was dialled.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Unix sockets are not available on this platform.
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix {
        /// Endpoint that was requested.
        endpoint: String,
    },
    /// Binding the Unix listener failed.
    #[cfg(unix)]
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Another live process owns the socket path.
    #[cfg(unix)]
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// Inspecting an existing socket path failed.
    #[cfg(unix)]
    #[error("failed to inspect unix socket {path}: {source}")]
    UnixMetadata {
        /// Socket path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// Probing an existing socket for a live owner failed unexpectedly.
    #[cfg(unix)]
    #[error("failed to probe unix socket {path}: {source}")]
    UnixProbe {
        /// Socket path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
    /// The socket path exists but is not a socket.
    #[cfg(unix)]
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Socket path.
        path: String,
    },
    /// A stale socket file could not be removed.
    #[cfg(unix)]
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl TransportError {
    /// Whether the failure was the connect attempt timing out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Connect { source, .. }
                if matches!(source.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
        )
    }
}
