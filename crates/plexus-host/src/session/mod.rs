//! Host side of a live plugin connection.
//!
//! [`PluginSession::establish`] turns a [`ReattachConfig`] into an open,
//! handshaken RPC channel. The session records the hook set the plugin
//! reported and refuses to dispatch anything outside it.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use plexus_config::{Config, SocketEndpoint, default_call_timeout, default_handshake_timeout};
use plexus_plugin::transport::{ConnectionStream, connect};
use plexus_plugin::wire::{Frame, FrameReader, HookRequest, Request, WireError, write_frame};
use plexus_plugin::{
    CommandArgs, CommandResponse, Dispatcher, HANDSHAKE, HandshakeDescriptor, HookId, HookSet,
    ReattachConfig, RpcChannel, RpcError,
};

use crate::error::PluginError;

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Bounds and identity used when opening sessions.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    handshake: HandshakeDescriptor,
    handshake_timeout: Duration,
    call_timeout: Duration,
}

impl SessionOptions {
    /// Standard handshake with the default timeouts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handshake: HANDSHAKE.clone(),
            handshake_timeout: default_handshake_timeout(),
            call_timeout: default_call_timeout(),
        }
    }

    /// Standard handshake with the timeouts from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_handshake_timeout(config.handshake_timeout())
            .with_call_timeout(config.call_timeout())
    }

    /// Presents a different descriptor in `hello`.
    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeDescriptor) -> Self {
        self.handshake = handshake;
        self
    }

    /// Bounds connecting plus the handshake exchange.
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bounds each hook call.
    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Descriptor presented in `hello`.
    #[must_use]
    pub const fn handshake(&self) -> &HandshakeDescriptor {
        &self.handshake
    }

    /// Connect and handshake bound.
    #[must_use]
    pub const fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Hook call bound.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// An established connection to one plugin process.
#[derive(Debug)]
pub struct PluginSession {
    plugin_id: String,
    endpoint: SocketEndpoint,
    protocol_version: u32,
    hooks: HookSet,
    channel: RpcChannel,
    call_timeout: Duration,
}

impl PluginSession {
    /// Connects to the plugin described by `config` and runs the handshake.
    ///
    /// Calls the plugin makes back into the host are answered by
    /// `dispatcher`.
    ///
    /// # Errors
    ///
    /// Returns a transport-classified [`PluginError`] when the descriptor
    /// cannot be honoured, the process is gone, the connection fails, or the
    /// handshake is refused, mismatched, malformed or too slow.
    pub fn establish(
        plugin_id: &str,
        config: &ReattachConfig,
        dispatcher: Arc<dyn Dispatcher>,
        options: &SessionOptions,
    ) -> Result<Self, PluginError> {
        let expected = options.handshake.protocol_version();
        if config.protocol_version != expected {
            return Err(PluginError::UnsupportedProtocol {
                id: plugin_id.to_owned(),
                expected,
                found: config.protocol_version,
            });
        }
        if config.tls.is_some() {
            return Err(PluginError::UnsupportedTransport {
                id: plugin_id.to_owned(),
                reason: String::from("TLS sessions are not supported"),
            });
        }
        if let Some(pid) = config.pid {
            ensure_running(plugin_id, pid)?;
        }

        let timeout = options.handshake_timeout;
        let mut stream = connect(&config.addr, timeout).map_err(|source| {
            if source.is_timeout() {
                PluginError::Timeout {
                    id: plugin_id.to_owned(),
                    operation: "connect",
                    timeout_ms: millis(timeout),
                }
            } else {
                PluginError::Transport {
                    id: plugin_id.to_owned(),
                    source,
                }
            }
        })?;
        let wire = |source: WireError| wire_error(plugin_id, timeout, source);
        let read_half = stream.try_clone().map_err(|error| wire(error.into()))?;
        let mut reader = FrameReader::new(read_half);
        let hooks = hello(plugin_id, options, &mut stream, &mut reader).inspect_err(|_| {
            stream.shutdown().ok();
        })?;

        let (channel, driver) = RpcChannel::new(stream, reader, dispatcher, options.call_timeout)
            .map_err(|error| wire(error.into()))?;
        thread::Builder::new()
            .name(format!("plexus-session-{plugin_id}"))
            .spawn(move || driver.run())
            .map_err(|error| {
                channel.close();
                wire(error.into())
            })?;

        info!(
            target: SESSION_TARGET,
            plugin = %plugin_id,
            endpoint = %config.addr,
            hooks = ?hooks,
            "plugin session established"
        );
        Ok(Self {
            plugin_id: plugin_id.to_owned(),
            endpoint: config.addr.clone(),
            protocol_version: expected,
            hooks,
            channel,
            call_timeout: options.call_timeout,
        })
    }

    /// Identifier of the plugin on the other end.
    #[must_use]
    pub const fn plugin_id(&self) -> &str {
        self.plugin_id.as_str()
    }

    /// Endpoint the session is connected to.
    #[must_use]
    pub const fn endpoint(&self) -> &SocketEndpoint {
        &self.endpoint
    }

    /// Negotiated protocol version.
    #[must_use]
    pub const fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Hooks the plugin reported during the handshake.
    #[must_use]
    pub const fn hooks(&self) -> &HookSet {
        &self.hooks
    }

    /// Whether the plugin reported `hook`.
    #[must_use]
    pub fn implements(&self, hook: HookId) -> bool {
        self.hooks.contains(hook)
    }

    /// Invokes a hook and returns its raw reply.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::HookNotImplemented`] for unreported hooks,
    /// [`PluginError::Timeout`] when no reply arrives within the call bound,
    /// and [`PluginError::Hook`] for any other failure.
    pub fn invoke(&self, request: HookRequest) -> Result<Value, PluginError> {
        self.call(request)
    }

    /// Runs a slash command through the plugin's `execute_command` hook.
    ///
    /// # Errors
    ///
    /// As [`PluginSession::invoke`].
    pub fn execute_command(&self, args: CommandArgs) -> Result<CommandResponse, PluginError> {
        self.call(HookRequest::ExecuteCommand(args))
    }

    fn call<T: DeserializeOwned>(&self, request: HookRequest) -> Result<T, PluginError> {
        let hook = request.hook();
        if !self.implements(hook) {
            return Err(PluginError::HookNotImplemented {
                id: self.plugin_id.clone(),
                hook,
            });
        }
        debug!(target: SESSION_TARGET, plugin = %self.plugin_id, %hook, "invoking hook");
        self.channel
            .call(Request::Hooks(request), self.call_timeout)
            .map_err(|source| match source {
                RpcError::Timeout { timeout_ms } => PluginError::Timeout {
                    id: self.plugin_id.clone(),
                    operation: hook.as_str(),
                    timeout_ms,
                },
                other => PluginError::Hook {
                    id: self.plugin_id.clone(),
                    hook,
                    source: other,
                },
            })
    }

    /// Ends the session. The plugin releases the handles bound to it.
    pub fn close(&self) {
        self.channel.close();
    }

    /// Whether the session has ended, from either side.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Waits up to `timeout` for the session to end.
    #[must_use]
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        self.channel.wait_closed(timeout)
    }
}

impl Drop for PluginSession {
    fn drop(&mut self) {
        self.channel.close();
    }
}

/// Sends `hello` and waits for the plugin's answer under the handshake bound.
fn hello(
    plugin_id: &str,
    options: &SessionOptions,
    stream: &mut ConnectionStream,
    reader: &mut FrameReader<ConnectionStream>,
) -> Result<HookSet, PluginError> {
    let timeout = options.handshake_timeout;
    let wire = |source: WireError| wire_error(plugin_id, timeout, source);
    let protocol = |message: String| PluginError::Protocol {
        id: plugin_id.to_owned(),
        message,
    };

    stream
        .set_write_timeout(Some(timeout))
        .map_err(|error| wire(error.into()))?;
    reader
        .get_ref()
        .set_read_timeout(Some(timeout))
        .map_err(|error| wire(error.into()))?;
    write_frame(
        &mut *stream,
        &Frame::Hello {
            handshake: options.handshake.clone(),
        },
    )
    .map_err(wire)?;

    let hooks = match reader.read_frame().map_err(wire)? {
        Some(Frame::Welcome { handshake, hooks }) => {
            options
                .handshake
                .verify(&handshake)
                .map_err(|source| PluginError::Handshake {
                    id: plugin_id.to_owned(),
                    source,
                })?;
            hooks
        }
        Some(Frame::Rejected { reason }) => {
            return Err(PluginError::Rejected {
                id: plugin_id.to_owned(),
                reason,
            });
        }
        Some(other) => return Err(protocol(format!("expected welcome, got {other:?}"))),
        None => return Err(protocol(String::from("connection closed during handshake"))),
    };

    reader
        .get_ref()
        .set_read_timeout(None)
        .map_err(|error| wire(error.into()))?;
    Ok(hooks)
}

fn wire_error(plugin_id: &str, timeout: Duration, source: WireError) -> PluginError {
    if source.is_timeout() {
        PluginError::Timeout {
            id: plugin_id.to_owned(),
            operation: "handshake",
            timeout_ms: millis(timeout),
        }
    } else {
        PluginError::Wire {
            id: plugin_id.to_owned(),
            source,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(unix)]
fn ensure_running(plugin_id: &str, pid: u32) -> Result<(), PluginError> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let not_running = || PluginError::ProcessNotRunning {
        id: plugin_id.to_owned(),
        pid,
    };
    if pid == 0 {
        return Err(not_running());
    }
    let raw = i32::try_from(pid).map_err(|_| not_running())?;
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(()),
        Err(Errno::ESRCH) => Err(not_running()),
        Err(errno) => {
            debug!(
                target: SESSION_TARGET,
                plugin = %plugin_id,
                pid,
                error = %errno,
                "liveness probe inconclusive"
            );
            Ok(())
        }
    }
}

#[cfg(not(unix))]
const fn ensure_running(_plugin_id: &str, _pid: u32) -> Result<(), PluginError> {
    Ok(())
}
