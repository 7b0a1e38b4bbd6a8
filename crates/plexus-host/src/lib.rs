//! Host side of the Plexus plugin system.
//!
//! The host keeps a registry of plugin identities (the [`Environment`]) and
//! binds each to at most one live session with an out-of-process plugin.
//! Sessions are established by *reattaching* to a plugin process that is
//! already running and has published a [`ReattachConfig`]: the host
//! connects, exchanges the handshake, and activates the plugin once its
//! capability handles have been injected.
//!
//! [`PluginHost::reattach_plugin`] is the operation exposed to the rest of
//! the host. It deactivates and forgets whatever was bound to the identifier
//! before attaching afresh, so a restarted plugin process (or a restarted
//! host) can always be picked up again.
//!
//! Plugin calls back into the host land in [`HostServices`]: a [`HostApi`]
//! with a per-plugin key-value store and a [`HostDriver`].
//!
//! [`ReattachConfig`]: plexus_plugin::ReattachConfig

mod bootstrap;
pub mod environment;
pub mod error;
mod health;
mod host;
pub mod manifest;
pub mod services;
pub mod session;
mod shutdown;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Host, RunError, StartupError, StaticConfigLoader,
    SystemConfigLoader, bootstrap_with, run_host,
};
pub use environment::{Environment, LockedPlugin, PluginState};
pub use error::{AppError, ErrorClass, PLUGIN_DISABLED, PLUGIN_REATTACH_FAILED, PluginError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use host::PluginHost;
pub use manifest::PluginManifest;
pub use plexus_plugin::{ReattachConfig, TlsMaterial, WireProtocol};
pub use services::{DisabledDriver, HostApi, HostDriver, HostServices, MemoryApi};
pub use session::{PluginSession, SessionOptions};
pub use shutdown::{STOP_SIGNALS, ShutdownError, ShutdownSignal, SystemShutdownSignal};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
