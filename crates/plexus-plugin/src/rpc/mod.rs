//! Bidirectional call multiplexing over one session connection.
//!
//! Both processes act as client and server on the same socket: the host
//! calls plugin hooks while the plugin calls back into the host API. An
//! [`RpcChannel`] is the cheap, cloneable calling side; its paired
//! [`ChannelDriver`] owns the read half and must run on a dedicated thread.
//! The driver routes replies to waiting callers and hands each incoming call
//! to the [`Dispatcher`] on its own thread, so a hook that calls back into
//! the host never stalls the reader it is waiting on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::transport::ConnectionStream;
use crate::wire::{Frame, FrameReader, Outcome, RemoteError, Request, WireError, write_frame};

const RPC_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::rpc");

/// Serves calls arriving from the peer.
pub trait Dispatcher: Send + Sync + 'static {
    /// Handles one request and produces the reply payload.
    ///
    /// # Errors
    ///
    /// Returns a [`RemoteError`] which is sent back to the caller verbatim.
    fn dispatch(&self, request: Request) -> Result<serde_json::Value, RemoteError>;
}

/// Errors raised by [`RpcChannel::call`].
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The session is closed or closed while the call was in flight.
    #[error("session is closed")]
    Closed,
    /// No reply arrived in time.
    #[error("call timed out after {timeout_ms}ms")]
    Timeout {
        /// The bound that elapsed.
        timeout_ms: u64,
    },
    /// The peer answered with an error.
    #[error("peer returned an error: {0}")]
    Remote(RemoteError),
    /// Writing the call failed.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The reply payload did not have the expected shape.
    #[error("unexpected reply payload: {0}")]
    Decode(#[source] Arc<serde_json::Error>),
}

#[derive(Default)]
struct CallState {
    closed: bool,
    pending: HashMap<u64, mpsc::Sender<Outcome>>,
}

struct Shared {
    writer: Mutex<ConnectionStream>,
    control: ConnectionStream,
    state: Mutex<CallState>,
    closed: Condvar,
    next_id: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, CallState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send(&self, frame: &Frame) -> Result<(), WireError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        write_frame(&mut *writer, frame)
    }

    fn mark_closed(&self) {
        let mut state = self.state();
        if state.closed {
            return;
        }
        state.closed = true;
        // Dropping the senders wakes every waiting caller with `Closed`.
        state.pending.clear();
        drop(state);
        self.closed.notify_all();
    }
}

/// Calling side of a session connection.
#[derive(Clone)]
pub struct RpcChannel {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Read loop of a session connection.
pub struct ChannelDriver {
    channel: RpcChannel,
    reader: FrameReader<ConnectionStream>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl RpcChannel {
    /// Pairs a channel with the driver that feeds it.
    ///
    /// `reader` must wrap the read half of the same connection as `writer`.
    /// Passing the reader used during the handshake preserves any bytes it
    /// has already buffered. Every write, including the closing `Goodbye`,
    /// gives up after `write_timeout`, so a peer that stops reading cannot
    /// wedge the caller holding the writer.
    ///
    /// # Errors
    ///
    /// Fails when the write bound is rejected or the socket cannot be
    /// duplicated for shutdown control.
    pub fn new(
        writer: ConnectionStream,
        reader: FrameReader<ConnectionStream>,
        dispatcher: Arc<dyn Dispatcher>,
        write_timeout: Duration,
    ) -> std::io::Result<(Self, ChannelDriver)> {
        writer.set_write_timeout(Some(write_timeout))?;
        let control = writer.try_clone()?;
        let channel = Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(writer),
                control,
                state: Mutex::new(CallState::default()),
                closed: Condvar::new(),
                next_id: AtomicU64::new(1),
            }),
        };
        let driver = ChannelDriver {
            channel: channel.clone(),
            reader,
            dispatcher,
        };
        Ok((channel, driver))
    }

    /// Sends `request` and waits up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// See [`RpcError`].
    pub fn call<T: DeserializeOwned>(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<T, RpcError> {
        let (tx, rx) = mpsc::channel();
        let id = {
            let mut state = self.shared.state();
            if state.closed {
                return Err(RpcError::Closed);
            }
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            state.pending.insert(id, tx);
            id
        };

        if let Err(error) = self.shared.send(&Frame::Call { id, request }) {
            self.forget(id);
            return Err(if self.is_closed() {
                RpcError::Closed
            } else {
                RpcError::Wire(error)
            });
        }

        match rx.recv_timeout(timeout) {
            Ok(Outcome::Ok(value)) => {
                serde_json::from_value(value).map_err(|error| RpcError::Decode(Arc::new(error)))
            }
            Ok(Outcome::Err(remote)) => Err(RpcError::Remote(remote)),
            Err(RecvTimeoutError::Timeout) => {
                self.forget(id);
                Err(RpcError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(RpcError::Closed),
        }
    }

    /// Ends the session: says goodbye, shuts the socket and fails every
    /// outstanding call. Idempotent.
    pub fn close(&self) {
        if self.is_closed() {
            return;
        }
        if let Err(error) = self.shared.send(&Frame::Goodbye) {
            debug!(target: RPC_TARGET, error = %error, "goodbye not delivered");
        }
        if let Err(error) = self.shared.control.shutdown()
            && error.kind() != std::io::ErrorKind::NotConnected
        {
            debug!(target: RPC_TARGET, error = %error, "socket shutdown failed");
        }
        self.shared.mark_closed();
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state().closed
    }

    /// Blocks until the session ends or `timeout` elapses. Returns whether it
    /// ended.
    #[must_use]
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();
        while !state.closed {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .shared
                .closed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    fn forget(&self, id: u64) {
        self.shared.state().pending.remove(&id);
    }

    fn reply(&self, id: u64, outcome: Outcome) {
        if let Err(error) = self.shared.send(&Frame::Reply { id, outcome })
            && !self.is_closed()
        {
            warn!(target: RPC_TARGET, id, error = %error, "failed to send reply");
        }
    }
}

impl ChannelDriver {
    /// Reads frames until the connection ends, then marks the channel closed.
    pub fn run(mut self) {
        loop {
            match self.reader.read_frame() {
                Ok(Some(Frame::Call { id, request })) => self.dispatch(id, request),
                Ok(Some(Frame::Reply { id, outcome })) => self.route(id, outcome),
                Ok(Some(Frame::Goodbye) | None) => {
                    debug!(target: RPC_TARGET, "peer ended the session");
                    break;
                }
                Ok(Some(frame)) => {
                    warn!(target: RPC_TARGET, ?frame, "ignoring out-of-sequence frame");
                }
                Err(error) => {
                    if !self.channel.is_closed() {
                        warn!(target: RPC_TARGET, error = %error, "session read failed");
                    }
                    break;
                }
            }
        }
        if let Err(error) = self.channel.shared.control.shutdown()
            && error.kind() != std::io::ErrorKind::NotConnected
        {
            debug!(target: RPC_TARGET, error = %error, "socket shutdown failed");
        }
        self.channel.shared.mark_closed();
    }

    fn dispatch(&self, id: u64, request: Request) {
        let channel = self.channel.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        thread::spawn(move || {
            let outcome = match dispatcher.dispatch(request) {
                Ok(value) => Outcome::Ok(value),
                Err(error) => Outcome::Err(error),
            };
            channel.reply(id, outcome);
        });
    }

    fn route(&self, id: u64, outcome: Outcome) {
        let Some(waiter) = self.channel.shared.state().pending.remove(&id) else {
            debug!(target: RPC_TARGET, id, "reply for unknown call");
            return;
        };
        // A send error means the caller gave up after a timeout.
        waiter.send(outcome).ok();
    }
}
