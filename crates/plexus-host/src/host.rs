//! Host-level plugin operations.

use std::sync::Arc;

use plexus_config::Config;
use plexus_plugin::ReattachConfig;

use crate::environment::Environment;
use crate::error::{AppError, ErrorClass, PLUGIN_DISABLED, PLUGIN_REATTACH_FAILED};
use crate::health::HealthReporter;
use crate::manifest::PluginManifest;
use crate::services::HostServices;
use crate::session::SessionOptions;

const REATTACH_OPERATION: &str = "reattach_plugin";

/// Entry point for plugin lifecycle operations.
///
/// Holds the plugin [`Environment`] unless plugins are administratively
/// disabled, in which case every operation is refused with
/// [`ErrorClass::NotImplemented`].
#[derive(Debug, Clone, Default)]
pub struct PluginHost {
    environment: Option<Arc<Environment>>,
}

impl PluginHost {
    /// Builds the host described by `config`.
    #[must_use]
    pub fn new(config: &Config, services: HostServices, reporter: Arc<dyn HealthReporter>) -> Self {
        let environment = config.plugins_enabled().then(|| {
            Arc::new(
                Environment::new(services, SessionOptions::from_config(config))
                    .with_reporter(reporter),
            )
        });
        Self { environment }
    }

    /// A host with plugins switched off.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { environment: None }
    }

    /// A host backed by an existing environment.
    #[must_use]
    pub const fn with_environment(environment: Arc<Environment>) -> Self {
        Self {
            environment: Some(environment),
        }
    }

    /// The plugin environment, or `None` when plugins are disabled.
    #[must_use]
    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_deref()
    }

    /// Binds `manifest` to the running plugin process described by `config`.
    ///
    /// Any existing session for the identifier is deactivated and the
    /// identifier removed before attaching, all under the identifier's
    /// lifecycle lock. On failure the identifier is left absent.
    ///
    /// # Errors
    ///
    /// Returns an [`AppError`] coded [`PLUGIN_DISABLED`] (501) when plugins
    /// are disabled, or coded [`PLUGIN_REATTACH_FAILED`] (500) wrapping the
    /// underlying [`PluginError`](crate::PluginError) when attaching fails.
    pub fn reattach_plugin(
        &self,
        manifest: &PluginManifest,
        config: &ReattachConfig,
    ) -> Result<(), AppError> {
        let Some(environment) = self.environment() else {
            return Err(AppError::new(
                REATTACH_OPERATION,
                PLUGIN_DISABLED,
                ErrorClass::NotImplemented,
                "plugins are disabled",
            ));
        };

        environment
            .with_plugin_lock(manifest.id(), |plugin| {
                plugin.deactivate();
                plugin.remove();
                plugin.reattach(manifest, config)
            })
            .map_err(|source| {
                AppError::new(
                    REATTACH_OPERATION,
                    PLUGIN_REATTACH_FAILED,
                    ErrorClass::Internal,
                    format!("failed to reattach plugin '{}'", manifest.id()),
                )
                .with_source(source)
            })
    }

    /// Deactivates every plugin.
    pub fn shutdown(&self) {
        if let Some(environment) = self.environment() {
            environment.shutdown();
        }
    }
}
