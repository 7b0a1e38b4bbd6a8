//! Blocking until the operator asks the host to stop.

use std::ffi::c_int;
use std::io;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

const SHUTDOWN_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::shutdown");

/// Signals that stop the host.
pub const STOP_SIGNALS: [c_int; 4] = [SIGTERM, SIGINT, SIGQUIT, SIGHUP];

/// Something the host blocks on before deactivating its plugins.
pub trait ShutdownSignal: Send + Sync {
    /// Returns once the host should tear its plugins down and exit.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the listener cannot be registered.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Failure to listen for a stop request.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The signal listener could not be registered.
    #[error("cannot listen for stop signals: {source}")]
    Install {
        /// Registration failure.
        #[source]
        source: io::Error,
    },
}

/// Waits for one of [`STOP_SIGNALS`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut listener =
            Signals::new(STOP_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
        let received = listener.forever().next();
        info!(target: SHUTDOWN_TARGET, signal = ?received, "stopping host");
        Ok(())
    }
}
