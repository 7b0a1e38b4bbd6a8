//! Socket plumbing shared by both ends of a plugin session.
//!
//! The plugin binds a [`SocketListener`] and serves each accepted
//! [`ConnectionStream`] through a [`ConnectionHandler`]; the host dials the
//! advertised endpoint with [`connect`].

mod errors;
mod listener;
mod stream;

pub use self::errors::TransportError;
pub use self::listener::SocketListener;
pub use self::stream::{ConnectionStream, connect};

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Handles accepted socket connections.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Handles a single connection. Implementations should avoid panicking.
    fn handle(&self, stream: ConnectionStream);
}
