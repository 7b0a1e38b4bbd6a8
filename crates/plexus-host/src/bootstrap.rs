//! Host bootstrap orchestration.

use std::fs;
use std::io;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::{OrthoConfig, OrthoError};
use serde::de::DeserializeOwned;
use thiserror::Error;

use plexus_config::Config;
use plexus_plugin::ReattachConfig;

use crate::error::AppError;
use crate::health::HealthReporter;
use crate::host::PluginHost;
use crate::manifest::PluginManifest;
use crate::services::HostServices;
use crate::shutdown::{ShutdownError, ShutdownSignal};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

const BOOTSTRAP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bootstrap");

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the host configuration.
    ///
    /// # Errors
    ///
    /// Returns the loader's error when configuration cannot be assembled.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that returns a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps `config`.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// Errors raised while reattaching the plugin named in configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    /// A manifest or descriptor file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was read.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: Arc<io::Error>,
    },
    /// A manifest or descriptor file is not valid JSON of the right shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that was parsed.
        path: Utf8PathBuf,
        /// Underlying decode error.
        #[source]
        source: Arc<serde_json::Error>,
    },
    /// The reattach itself failed.
    #[error(transparent)]
    Reattach(#[from] AppError),
}

/// Errors that end a host run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The configured start-up reattach failed.
    #[error("start-up reattach failed: {0}")]
    Startup(#[from] StartupError),
    /// Waiting for the shutdown signal failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Result of a successful bootstrap invocation.
#[derive(Debug)]
pub struct Host {
    config: Config,
    plugins: PluginHost,
    telemetry: TelemetryHandle,
}

impl Host {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The plugin lifecycle entry point.
    #[must_use]
    pub const fn plugins(&self) -> &PluginHost {
        &self.plugins
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Reattaches the plugin named by `reattach_manifest` and
    /// `reattach_descriptor`, when both are configured.
    ///
    /// Returns the identifier of the attached plugin, or `None` when no
    /// start-up reattach is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] when either file cannot be read or parsed, or
    /// when the reattach fails.
    pub fn reattach_configured(&self) -> Result<Option<String>, StartupError> {
        let Some((manifest_path, descriptor_path)) = self.config.startup_reattach() else {
            return Ok(None);
        };
        let manifest: PluginManifest = read_json(manifest_path)?;
        let descriptor: ReattachConfig = read_json(descriptor_path)?;
        self.plugins.reattach_plugin(&manifest, &descriptor)?;
        Ok(Some(manifest.id().to_owned()))
    }

    /// Deactivates every plugin.
    pub fn shutdown(&self) {
        self.plugins.shutdown();
    }
}

/// Bootstraps the host using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration cannot be loaded or
/// telemetry cannot be installed. Both are reported to `reporter`.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    services: HostServices,
) -> Result<Host, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let plugins = PluginHost::new(&config, services, Arc::clone(&reporter));
    reporter.bootstrap_succeeded(&config);

    Ok(Host {
        config,
        plugins,
        telemetry,
    })
}

/// Bootstraps the host, performs the configured start-up reattach, waits
/// for `shutdown` and deactivates every plugin.
///
/// # Errors
///
/// Returns [`RunError`] when any stage fails.
pub fn run_host(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    services: HostServices,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), RunError> {
    let host = bootstrap_with(loader, reporter, services)?;
    if let Some(plugin) = host.reattach_configured()? {
        tracing::info!(target: BOOTSTRAP_TARGET, plugin = %plugin, "start-up reattach completed");
    }
    let waited = shutdown.wait();
    host.shutdown();
    tracing::info!(target: BOOTSTRAP_TARGET, "host stopped");
    waited.map_err(RunError::from)
}

fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, StartupError> {
    let raw = fs::read_to_string(path).map_err(|source| StartupError::Read {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })?;
    serde_json::from_str(&raw).map_err(|source| StartupError::Parse {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })
}
