//! Host capabilities injected into a plugin after the handshake.
//!
//! A session carries exactly one [`Api`] handle and one [`Driver`] handle.
//! Both are installed on the plugin's [`PluginBase`](crate::PluginBase) after
//! the handshake succeeds and before the host can dispatch `on_activate`;
//! until then they read as unset. The handles are RPC clients that call back
//! into the host over the session's connection.

mod client;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rpc::RpcError;
use crate::wire::RemoteError;

pub use self::client::{ApiClient, DriverClient};

/// Key prefix reserved for SDK bookkeeping in the plugin key-value store.
pub const INTERNAL_KEY_PREFIX: &str = "plx_";

/// Key under which the SDK stores the plugin's bot user identifier.
pub const BOT_USER_KEY: &str = "plx_botid";

/// A single result row returned by [`Driver::query`].
pub type Row = Vec<serde_json::Value>;

/// Severity of a message forwarded to the host log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Routine information.
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// A failure.
    Error,
}

/// Errors surfaced to plugin code by capability handles.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The host rejected or failed the call.
    #[error("host rejected the call: {0}")]
    Remote(RemoteError),
    /// The session carrying the call failed.
    #[error("capability call failed: {0}")]
    Rpc(#[source] RpcError),
}

impl From<RpcError> for CapabilityError {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Remote(remote) => Self::Remote(remote),
            other => Self::Rpc(other),
        }
    }
}

/// Host functionality available to plugin code.
pub trait Api: Send + Sync {
    /// Version string of the host.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the call.
    fn server_version(&self) -> Result<String, CapabilityError>;

    /// Writes a message to the host log, attributed to this plugin.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the call.
    fn log(&self, level: LogLevel, message: &str) -> Result<(), CapabilityError>;

    /// Reads a value from the plugin's key-value store.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the call.
    fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, CapabilityError>;

    /// Writes a value to the plugin's key-value store.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the call.
    fn kv_set(&self, key: &str, value: &[u8]) -> Result<(), CapabilityError>;

    /// Deletes a key from the plugin's key-value store.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the call.
    fn kv_delete(&self, key: &str) -> Result<(), CapabilityError>;

    /// Lists the plugin's keys, excluding SDK-reserved ones.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the call.
    fn kv_list(&self) -> Result<Vec<String>, CapabilityError>;
}

/// Statement driver backed by the host's database connection.
pub trait Driver: Send + Sync {
    /// Executes a statement and returns the number of affected rows.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the statement.
    fn exec(&self, statement: &str, params: &[serde_json::Value]) -> Result<u64, CapabilityError>;

    /// Runs a query and returns its rows.
    ///
    /// # Errors
    ///
    /// Fails when the session is closed or the host rejects the query.
    fn query(
        &self,
        statement: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<Row>, CapabilityError>;
}
