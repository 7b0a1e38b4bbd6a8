//! Error types for plugin serving.

use std::io;
use std::sync::Arc;

use plexus_config::{SocketParseError, SocketPreparationError};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors that prevent a plugin from serving.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The process was not started by a host.
    #[error("this binary is a plugin and must be launched by a host ({key} is unset)")]
    MissingCookie {
        /// Environment variable that should carry the cookie.
        key: String,
    },
    /// The cookie variable is present but holds the wrong value.
    #[error("plugin cookie in {key} does not match")]
    CookieMismatch {
        /// Environment variable that carried the cookie.
        key: String,
    },
    /// The endpoint override could not be parsed.
    #[error("invalid plugin endpoint in {variable}: {source}")]
    Endpoint {
        /// Environment variable that held the value.
        variable: &'static str,
        /// Parse failure.
        #[source]
        source: SocketParseError,
    },
    /// The socket directory could not be prepared.
    #[error(transparent)]
    Prepare(#[from] SocketPreparationError),
    /// Binding the listener failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Writing the reattach descriptor failed.
    #[error("failed to publish reattach descriptor: {0}")]
    Publish(#[source] Arc<io::Error>),
    /// Nobody is listening for the reattach descriptor.
    #[error("reattach descriptor receiver was dropped")]
    PublishClosed,
}
