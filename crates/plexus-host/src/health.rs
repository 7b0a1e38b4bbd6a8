//! Structured health reporting for host and plugin lifecycle events.

use std::sync::Arc;

use plexus_config::{Config, SocketEndpoint};
use plexus_plugin::HookSet;

use crate::bootstrap::BootstrapError;
use crate::error::PluginError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked before the host connects to a plugin process.
    fn plugin_attaching(&self, plugin_id: &str, endpoint: &SocketEndpoint);

    /// Invoked once a plugin session is installed.
    fn plugin_attached(&self, plugin_id: &str, hooks: &HookSet);

    /// Invoked when attaching a plugin fails.
    fn plugin_attach_failed(&self, plugin_id: &str, error: &PluginError);

    /// Invoked after a plugin session is torn down.
    fn plugin_deactivated(&self, plugin_id: &str);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn plugin_attaching(&self, plugin_id: &str, endpoint: &SocketEndpoint) {
        (**self).plugin_attaching(plugin_id, endpoint);
    }

    fn plugin_attached(&self, plugin_id: &str, hooks: &HookSet) {
        (**self).plugin_attached(plugin_id, hooks);
    }

    fn plugin_attach_failed(&self, plugin_id: &str, error: &PluginError) {
        (**self).plugin_attach_failed(plugin_id, error);
    }

    fn plugin_deactivated(&self, plugin_id: &str) {
        (**self).plugin_deactivated(plugin_id);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting host bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            plugins_enabled = config.plugins_enabled(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "host bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "host bootstrap failed"
        );
    }

    fn plugin_attaching(&self, plugin_id: &str, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_attaching",
            plugin = %plugin_id,
            endpoint = %endpoint,
            "attaching plugin"
        );
    }

    fn plugin_attached(&self, plugin_id: &str, hooks: &HookSet) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_attached",
            plugin = %plugin_id,
            hooks = ?hooks,
            "plugin attached"
        );
    }

    fn plugin_attach_failed(&self, plugin_id: &str, error: &PluginError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "plugin_attach_failed",
            plugin = %plugin_id,
            transport = error.is_transport(),
            error = %error,
            "plugin failed to attach"
        );
    }

    fn plugin_deactivated(&self, plugin_id: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugin_deactivated",
            plugin = %plugin_id,
            "plugin deactivated"
        );
    }
}
