//! Per-connection session handling on the plugin side.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{SERVE_TARGET, ServeOptions};
use crate::capability::{ApiClient, DriverClient};
use crate::handshake::HandshakeDescriptor;
use crate::hooks::HookError;
use crate::plugin::Plugin;
use crate::rpc::{Dispatcher, RpcChannel};
use crate::transport::{ConnectionHandler, ConnectionStream};
use crate::wire::{Frame, FrameReader, HookRequest, RemoteError, Request, WireError, write_frame};

#[derive(Default)]
struct Sessions {
    generation: u64,
    current: Option<(u64, RpcChannel)>,
    stopped: bool,
}

/// Accepts host connections and binds each to the plugin.
pub(super) struct PluginServer {
    plugin: Arc<dyn Plugin>,
    handshake: HandshakeDescriptor,
    handshake_timeout: Duration,
    call_timeout: Duration,
    sessions: Mutex<Sessions>,
}

impl PluginServer {
    pub(super) fn new(plugin: Arc<dyn Plugin>, options: &ServeOptions) -> Self {
        Self {
            plugin,
            handshake: options.handshake.clone(),
            handshake_timeout: options.handshake_timeout,
            call_timeout: options.call_timeout,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, Sessions> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuses new sessions and closes the live one.
    pub(super) fn stop(&self) {
        let current = {
            let mut sessions = self.sessions();
            sessions.stopped = true;
            sessions.current.take()
        };
        if let Some((_, channel)) = current {
            channel.close();
        }
        self.plugin.base().clear();
    }

    /// Runs the handshake under the handshake timeout, for reads and writes
    /// alike. `Ok(false)` means the host was turned away and the connection
    /// should be dropped.
    fn handshake(
        &self,
        reader: &mut FrameReader<ConnectionStream>,
        writer: &mut ConnectionStream,
    ) -> Result<bool, WireError> {
        writer.set_write_timeout(Some(self.handshake_timeout))?;
        reader
            .get_ref()
            .set_read_timeout(Some(self.handshake_timeout))?;
        let accepted = self.accept_hello(reader, writer)?;
        reader.get_ref().set_read_timeout(None)?;
        Ok(accepted)
    }

    fn accept_hello(
        &self,
        reader: &mut FrameReader<ConnectionStream>,
        writer: &mut ConnectionStream,
    ) -> Result<bool, WireError> {
        let peer = match reader.read_frame()? {
            Some(Frame::Hello { handshake }) => handshake,
            Some(other) => {
                warn!(target: SERVE_TARGET, frame = ?other, "expected hello");
                return Ok(false);
            }
            None => {
                debug!(target: SERVE_TARGET, "host disconnected before hello");
                return Ok(false);
            }
        };
        if let Err(error) = self.handshake.verify(&peer) {
            warn!(target: SERVE_TARGET, error = %error, "rejecting host handshake");
            write_frame(
                &mut *writer,
                &Frame::Rejected {
                    reason: error.to_string(),
                },
            )?;
            return Ok(false);
        }
        write_frame(
            &mut *writer,
            &Frame::Welcome {
                handshake: self.handshake.clone(),
                hooks: self.plugin.implemented(),
            },
        )?;
        Ok(true)
    }

    /// Makes `channel` the live session and injects its capabilities.
    ///
    /// Returns the session generation, or `None` when serving has stopped.
    fn install(&self, channel: &RpcChannel) -> Option<u64> {
        let mut sessions = self.sessions();
        if sessions.stopped {
            return None;
        }
        sessions.generation += 1;
        let generation = sessions.generation;
        self.plugin
            .set_api(Arc::new(ApiClient::new(channel.clone(), self.call_timeout)));
        self.plugin.set_driver(Arc::new(DriverClient::new(
            channel.clone(),
            self.call_timeout,
        )));
        let previous = sessions.current.replace((generation, channel.clone()));
        drop(sessions);
        if let Some((superseded, old)) = previous {
            info!(
                target: SERVE_TARGET,
                superseded,
                generation,
                "newer host session supersedes the live one"
            );
            old.close();
        }
        Some(generation)
    }

    fn release(&self, generation: u64) {
        let mut sessions = self.sessions();
        if sessions
            .current
            .as_ref()
            .is_some_and(|(current, _)| *current == generation)
        {
            sessions.current = None;
            self.plugin.base().clear();
        }
    }
}

impl ConnectionHandler for PluginServer {
    fn handle(&self, stream: ConnectionStream) {
        let mut writer = stream;
        let mut reader = match writer.try_clone() {
            Ok(read_half) => FrameReader::new(read_half),
            Err(error) => {
                warn!(target: SERVE_TARGET, error = %error, "failed to split connection");
                return;
            }
        };
        match self.handshake(&mut reader, &mut writer) {
            Ok(true) => {}
            Ok(false) => return,
            Err(error) => {
                warn!(target: SERVE_TARGET, error = %error, "handshake failed");
                return;
            }
        }

        let dispatcher = Arc::new(HookDispatcher {
            plugin: Arc::clone(&self.plugin),
        });
        let started = RpcChannel::new(writer, reader, dispatcher, self.call_timeout);
        let (channel, driver) = match started {
            Ok(pair) => pair,
            Err(error) => {
                warn!(target: SERVE_TARGET, error = %error, "failed to start session");
                return;
            }
        };
        let Some(generation) = self.install(&channel) else {
            channel.close();
            return;
        };
        info!(target: SERVE_TARGET, generation, "host session established");
        driver.run();
        self.release(generation);
        info!(target: SERVE_TARGET, generation, "host session ended");
    }
}

/// Routes hook calls from the host to the plugin.
struct HookDispatcher {
    plugin: Arc<dyn Plugin>,
}

impl Dispatcher for HookDispatcher {
    fn dispatch(&self, request: Request) -> Result<Value, RemoteError> {
        let Request::Hooks(call) = request else {
            return Err(RemoteError::not_implemented(
                "plugins serve only the hooks service",
            ));
        };
        let hook = call.hook();
        if !self.plugin.implemented().contains(hook) {
            return Err(RemoteError::not_implemented(format!(
                "hook {hook} is not implemented"
            )));
        }
        debug!(target: SERVE_TARGET, %hook, "dispatching hook");
        let result = match call {
            HookRequest::OnActivate => self.plugin.on_activate().map(|()| Value::Null),
            HookRequest::OnDeactivate => self.plugin.on_deactivate().map(|()| Value::Null),
            HookRequest::OnConfigurationChange => {
                self.plugin.on_configuration_change().map(|()| Value::Null)
            }
            HookRequest::ExecuteCommand(args) => {
                self.plugin.execute_command(&args).and_then(|response| {
                    serde_json::to_value(response).map_err(|error| HookError::new(error.to_string()))
                })
            }
        };
        result.map_err(|error| RemoteError::failed(error.message()))
    }
}
