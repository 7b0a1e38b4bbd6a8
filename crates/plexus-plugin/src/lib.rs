//! Plugin SDK and shared wire layer for Plexus.
//!
//! A Plexus plugin is an ordinary process that the host reaches over a socket
//! rather than loading in-process. This crate holds everything both ends of
//! that connection agree on, plus the plugin-side bootstrap:
//!
//! - [`handshake`]: the magic cookie and protocol version checked before a
//!   connection is trusted.
//! - [`wire`] and [`rpc`]: newline-delimited JSON frames and the call
//!   multiplexer that lets the host call hooks while the plugin calls back
//!   into the host on the same connection.
//! - [`capability`]: the [`Api`] and [`Driver`] handles injected into a
//!   plugin once a session is established.
//! - [`serve`](fn@serve) and [`serve_for_testing`]: bind an endpoint,
//!   publish a [`ReattachConfig`] and serve host sessions.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use plexus_plugin::{HookId, HookSet, Hooks, Plugin, PluginBase, serve};
//!
//! #[derive(Default)]
//! struct Quiet {
//!     base: PluginBase,
//! }
//!
//! impl Hooks for Quiet {
//!     fn implemented(&self) -> HookSet {
//!         [HookId::OnActivate].into_iter().collect()
//!     }
//! }
//!
//! impl Plugin for Quiet {
//!     fn base(&self) -> &PluginBase {
//!         &self.base
//!     }
//! }
//!
//! serve(Arc::new(Quiet::default())).expect("launched by a host");
//! ```

pub mod capability;
pub mod handshake;
pub mod hooks;
mod plugin;
pub mod reattach;
pub mod rpc;
pub mod serve;
pub mod transport;
pub mod wire;

pub use self::capability::{Api, ApiClient, CapabilityError, Driver, DriverClient, LogLevel, Row};
pub use self::handshake::{HANDSHAKE, HandshakeDescriptor, HandshakeError, PROTOCOL_VERSION};
pub use self::hooks::{CommandArgs, CommandResponse, HookError, HookId, HookSet, Hooks};
pub use self::plugin::{Plugin, PluginBase};
pub use self::reattach::{ReattachConfig, TlsMaterial, WireProtocol};
pub use self::rpc::{ChannelDriver, Dispatcher, RpcChannel, RpcError};
pub use self::serve::{CancelToken, ServeError, ServeOptions, serve, serve_for_testing, serve_with};
