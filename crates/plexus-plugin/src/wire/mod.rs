//! JSONL framing shared by the host and plugin processes.
//!
//! Every frame is one JSON object terminated by a newline. A connection opens
//! with the handshake (`hello`, answered by `welcome` or `rejected`) and then
//! carries multiplexed `call` / `reply` frames in both directions until one
//! side sends `goodbye` or drops the connection.
//!
//! Calls are typed: a [`Request`] names its service (`hooks` is served by the
//! plugin, `api` and `driver` by the host) and the method with its parameters.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capability::LogLevel;
use crate::handshake::HandshakeDescriptor;
use crate::hooks::{CommandArgs, HookId, HookSet};

/// Upper bound on a single encoded frame, excluding its terminating newline.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    /// First frame sent by the host.
    Hello {
        /// The host's protocol identity.
        handshake: HandshakeDescriptor,
    },
    /// Plugin acceptance of a `hello`.
    Welcome {
        /// The plugin's protocol identity.
        handshake: HandshakeDescriptor,
        /// Hooks the plugin implements.
        hooks: HookSet,
    },
    /// Plugin refusal of a `hello`; the plugin closes the connection after it.
    Rejected {
        /// Why the handshake failed.
        reason: String,
    },
    /// A remote procedure call.
    Call {
        /// Correlation id, unique per sender and connection.
        id: u64,
        /// The typed request.
        request: Request,
    },
    /// Result of a previous `call` from the peer.
    Reply {
        /// Correlation id of the call being answered.
        id: u64,
        /// Call result.
        outcome: Outcome,
    },
    /// Orderly end of the session.
    Goodbye,
}

/// Typed request addressed to one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "call", rename_all = "snake_case")]
pub enum Request {
    /// Hook invocation, served by the plugin.
    Hooks(HookRequest),
    /// Host API call, served by the host.
    Api(ApiRequest),
    /// Driver call, served by the host.
    Driver(DriverRequest),
}

/// Hook invocations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum HookRequest {
    /// `on_activate`.
    OnActivate,
    /// `on_deactivate`.
    OnDeactivate,
    /// `on_configuration_change`.
    OnConfigurationChange,
    /// `execute_command`.
    ExecuteCommand(CommandArgs),
}

impl HookRequest {
    /// Identifier of the hook this request invokes.
    #[must_use]
    pub const fn hook(&self) -> HookId {
        match self {
            Self::OnActivate => HookId::OnActivate,
            Self::OnDeactivate => HookId::OnDeactivate,
            Self::OnConfigurationChange => HookId::OnConfigurationChange,
            Self::ExecuteCommand(_) => HookId::ExecuteCommand,
        }
    }
}

/// Host API calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ApiRequest {
    /// Host version string.
    ServerVersion,
    /// Forward a log message.
    Log {
        /// Severity.
        level: LogLevel,
        /// Message text.
        message: String,
    },
    /// Read a key.
    KvGet {
        /// Key to read.
        key: String,
    },
    /// Write a key.
    KvSet {
        /// Key to write.
        key: String,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Delete a key.
    KvDelete {
        /// Key to delete.
        key: String,
    },
    /// List keys.
    KvList,
}

/// Driver calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum DriverRequest {
    /// Execute a statement.
    Exec {
        /// Statement text.
        statement: String,
        /// Positional parameters.
        #[serde(default)]
        params: Vec<serde_json::Value>,
    },
    /// Run a query.
    Query {
        /// Statement text.
        statement: String,
        /// Positional parameters.
        #[serde(default)]
        params: Vec<serde_json::Value>,
    },
}

/// Result carried by a `reply` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The call succeeded with this JSON value.
    Ok(serde_json::Value),
    /// The call failed.
    Err(RemoteError),
}

/// Failure category reported across the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The callee does not serve this request.
    NotImplemented,
    /// The request was malformed or violated a precondition.
    BadRequest,
    /// The callee tried and failed.
    Failed,
}

/// Error returned by the remote side of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct RemoteError {
    kind: RemoteErrorKind,
    message: String,
}

impl RemoteError {
    /// Creates a remote error.
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// The callee does not serve this request.
    #[must_use]
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::NotImplemented, message)
    }

    /// The request was malformed.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::BadRequest, message)
    }

    /// The callee failed.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Failed, message)
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> RemoteErrorKind {
        self.kind
    }

    /// Error message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }
}

/// Errors raised while reading or writing frames.
#[derive(Debug, Clone, Error)]
pub enum WireError {
    /// The underlying stream failed.
    #[error("connection I/O failed: {0}")]
    Io(#[source] Arc<io::Error>),
    /// A frame exceeded [`MAX_FRAME_BYTES`].
    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Configured limit.
        limit: usize,
    },
    /// A line was not a valid frame.
    #[error("malformed frame: {0}")]
    Decode(#[source] Arc<serde_json::Error>),
    /// A frame could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(#[source] Arc<serde_json::Error>),
}

impl WireError {
    /// Whether the failure was a read or write timeout on the socket.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Io(error)
                if matches!(error.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

impl From<io::Error> for WireError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

/// Buffered reader yielding one [`Frame`] per line.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buffer: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte stream.
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            buffer: Vec::new(),
        }
    }

    /// Reads the next frame. Returns `Ok(None)` on a clean end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`WireError`] on I/O failure, oversize lines, or invalid JSON.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, WireError> {
        // Room for the largest frame, its newline and one byte of overflow.
        let limit = u64::try_from(MAX_FRAME_BYTES)
            .unwrap_or(u64::MAX)
            .saturating_add(2);
        loop {
            self.buffer.clear();
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buffer)?;
            if read == 0 {
                return Ok(None);
            }
            let encoded = self.buffer.strip_suffix(b"\n").unwrap_or(&self.buffer);
            if encoded.len() > MAX_FRAME_BYTES {
                return Err(WireError::FrameTooLarge {
                    limit: MAX_FRAME_BYTES,
                });
            }
            let line = self.buffer.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_slice(line)
                .map(Some)
                .map_err(|error| WireError::Decode(Arc::new(error)));
        }
    }

    /// Shared access to the wrapped stream.
    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }
}

/// Encodes `frame` as one line and flushes it.
///
/// # Errors
///
/// Returns [`WireError`] when encoding or the write fails.
pub fn write_frame(mut writer: impl Write, frame: &Frame) -> Result<(), WireError> {
    let mut line =
        serde_json::to_vec(frame).map_err(|error| WireError::Encode(Arc::new(error)))?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}
