//! Plugin-side entry points.
//!
//! A plugin binary calls [`serve`] from `main`. It binds an endpoint, prints
//! the [`ReattachConfig`] a host needs to attach, and then serves host
//! sessions until the process exits. Tests use [`serve_for_testing`], which
//! skips the launch cookie, hands the descriptor over a channel and stops
//! when its [`CancelToken`] fires.
//!
//! Each accepted connection must open with the handshake. Once it succeeds
//! the plugin's capability slots are bound to that session before any hook
//! can run; a newer session replaces the older one.

mod errors;
mod server;

use std::env;
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use plexus_config::{
    PLUGIN_ENDPOINT_ENV_VAR, SocketEndpoint, default_call_timeout, default_handshake_timeout,
    default_plugin_endpoint,
};
use tracing::info;

use self::server::PluginServer;
use crate::handshake::{HANDSHAKE, HandshakeDescriptor};
use crate::plugin::{Plugin, validate_injection};
use crate::reattach::ReattachConfig;
use crate::transport::{ConnectionHandler, SocketListener};

pub use self::errors::ServeError;

pub(crate) const SERVE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::serve");

/// Cooperative stop signal for a serving loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the serving loop to stop.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn flag(&self) -> &AtomicBool {
        &self.0
    }
}

/// Parameters of a serving loop.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    handshake: HandshakeDescriptor,
    endpoint: SocketEndpoint,
    handshake_timeout: Duration,
    call_timeout: Duration,
    test: bool,
}

impl ServeOptions {
    /// Serves on `endpoint` with the standard handshake and default timeouts.
    #[must_use]
    pub fn new(endpoint: SocketEndpoint) -> Self {
        Self {
            handshake: HANDSHAKE.clone(),
            endpoint,
            handshake_timeout: default_handshake_timeout(),
            call_timeout: default_call_timeout(),
            test: false,
        }
    }

    /// Replaces the handshake descriptor the plugin expects.
    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeDescriptor) -> Self {
        self.handshake = handshake;
        self
    }

    /// Bounds how long a connecting host may take to say hello.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bounds each capability call made by plugin code.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Marks published descriptors as coming from a test bootstrap.
    #[must_use]
    pub const fn for_testing(mut self) -> Self {
        self.test = true;
        self
    }
}

/// Serves `plugin` for a host that launched this process.
///
/// Refuses to run unless the handshake cookie is present in the environment.
/// The endpoint comes from `PLEXUS_PLUGIN_ENDPOINT` and defaults to an
/// ephemeral loopback TCP port. The reattach descriptor is printed to stdout
/// as one JSON line. Does not return once serving has started.
///
/// # Errors
///
/// Returns [`ServeError`] when the cookie is missing, the endpoint is
/// invalid or cannot be bound, or the descriptor cannot be written.
///
/// # Panics
///
/// Panics when `plugin` does not expose the capability handles passed to
/// its injection methods.
pub fn serve<P: Plugin>(plugin: Arc<P>) -> Result<(), ServeError> {
    check_cookie(&HANDSHAKE, |key| env::var(key).ok())?;
    let endpoint = match env::var(PLUGIN_ENDPOINT_ENV_VAR) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|source| ServeError::Endpoint {
                    variable: PLUGIN_ENDPOINT_ENV_VAR,
                    source,
                })?
        }
        _ => default_plugin_endpoint(),
    };
    serve_with(
        ServeOptions::new(endpoint),
        plugin,
        &CancelToken::new(),
        |descriptor| {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer(&mut stdout, descriptor)
                .map_err(io::Error::from)
                .and_then(|()| writeln!(stdout))
                .and_then(|()| stdout.flush())
                .map_err(|error| ServeError::Publish(Arc::new(error)))
        },
    )
}

/// Serves `plugin` on an ephemeral loopback port for tests.
///
/// The descriptor (with `test` set) is sent on `reattach_tx` once the
/// endpoint is bound. Serving stops when `cancel` fires; open sessions are
/// closed and `close_tx` is dropped so its receiver observes the shutdown.
///
/// # Errors
///
/// Returns [`ServeError`] when binding fails or `reattach_tx` has no
/// receiver.
///
/// # Panics
///
/// Panics when `plugin` does not expose the capability handles passed to
/// its injection methods.
pub fn serve_for_testing<P: Plugin>(
    cancel: &CancelToken,
    plugin: Arc<P>,
    reattach_tx: &mpsc::Sender<ReattachConfig>,
    close_tx: Option<mpsc::Sender<()>>,
) -> Result<(), ServeError> {
    let options = ServeOptions::new(SocketEndpoint::tcp("127.0.0.1", 0)).for_testing();
    let result = serve_with(options, plugin, cancel, |descriptor| {
        reattach_tx
            .send(descriptor.clone())
            .map_err(|_| ServeError::PublishClosed)
    });
    drop(close_tx);
    result
}

/// Serves `plugin` with explicit options until `cancel` fires.
///
/// `publish` receives the reattach descriptor after the endpoint is bound
/// and before the first connection is accepted.
///
/// # Errors
///
/// Returns [`ServeError`] when binding fails or `publish` fails.
///
/// # Panics
///
/// Panics when `plugin` does not expose the capability handles passed to
/// its injection methods.
pub fn serve_with<P, F>(
    options: ServeOptions,
    plugin: Arc<P>,
    cancel: &CancelToken,
    publish: F,
) -> Result<(), ServeError>
where
    P: Plugin,
    F: FnOnce(&ReattachConfig) -> Result<(), ServeError>,
{
    let served: Arc<dyn Plugin> = plugin;
    validate_injection(served.as_ref());

    options.endpoint.prepare_filesystem()?;
    let listener = SocketListener::bind(&options.endpoint)?;
    let mut descriptor =
        ReattachConfig::new(listener.local_endpoint()?).with_pid(std::process::id());
    if options.test {
        descriptor = descriptor.for_testing();
    }
    let server = Arc::new(PluginServer::new(served, &options));

    publish(&descriptor)?;
    info!(
        target: SERVE_TARGET,
        endpoint = %descriptor.addr,
        pid = descriptor.pid,
        "plugin serving"
    );
    listener.run(cancel.flag(), Arc::clone(&server) as Arc<dyn ConnectionHandler>);
    server.stop();
    info!(target: SERVE_TARGET, "plugin stopped serving");
    Ok(())
}

fn check_cookie(
    handshake: &HandshakeDescriptor,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ServeError> {
    let key = handshake.cookie_key();
    match lookup(key) {
        None => Err(ServeError::MissingCookie {
            key: key.to_owned(),
        }),
        Some(value) if value != handshake.cookie_value() => Err(ServeError::CookieMismatch {
            key: key.to_owned(),
        }),
        Some(_) => Ok(()),
    }
}
