//! Host functionality served to plugins over their sessions.
//!
//! Plugins see the host through the `api` and `driver` services of the wire
//! protocol. On the host those calls land in a [`HostApi`] and a
//! [`HostDriver`], each told which plugin is calling so state stays
//! partitioned per plugin.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use plexus_plugin::capability::INTERNAL_KEY_PREFIX;
use plexus_plugin::wire::{ApiRequest, DriverRequest, RemoteError, Request};
use plexus_plugin::{Dispatcher, LogLevel, Row};

const API_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::plugin_api");

/// Host API surface, keyed by the calling plugin.
pub trait HostApi: Send + Sync {
    /// Version of the host.
    ///
    /// # Errors
    ///
    /// Implementations may refuse the call.
    fn server_version(&self, plugin_id: &str) -> Result<String, RemoteError>;

    /// Records a log message on behalf of a plugin.
    ///
    /// # Errors
    ///
    /// Implementations may refuse the call.
    fn log(&self, plugin_id: &str, level: LogLevel, message: &str) -> Result<(), RemoteError>;

    /// Reads a key from the plugin's store.
    ///
    /// # Errors
    ///
    /// Implementations may refuse the call.
    fn kv_get(&self, plugin_id: &str, key: &str) -> Result<Option<Vec<u8>>, RemoteError>;

    /// Writes a key to the plugin's store.
    ///
    /// # Errors
    ///
    /// Implementations may refuse the call.
    fn kv_set(&self, plugin_id: &str, key: &str, value: &[u8]) -> Result<(), RemoteError>;

    /// Deletes a key from the plugin's store.
    ///
    /// # Errors
    ///
    /// Implementations may refuse the call.
    fn kv_delete(&self, plugin_id: &str, key: &str) -> Result<(), RemoteError>;

    /// Lists the plugin's keys visible to plugin code.
    ///
    /// # Errors
    ///
    /// Implementations may refuse the call.
    fn kv_list(&self, plugin_id: &str) -> Result<Vec<String>, RemoteError>;
}

/// Statement driver served to plugins.
pub trait HostDriver: Send + Sync {
    /// Executes a statement, returning the affected row count.
    ///
    /// # Errors
    ///
    /// Implementations reject statements they cannot run.
    fn exec(&self, plugin_id: &str, statement: &str, params: &[Value]) -> Result<u64, RemoteError>;

    /// Runs a query, returning its rows.
    ///
    /// # Errors
    ///
    /// Implementations reject statements they cannot run.
    fn query(
        &self,
        plugin_id: &str,
        statement: &str,
        params: &[Value],
    ) -> Result<Vec<Row>, RemoteError>;
}

/// In-memory [`HostApi`] with one key space per plugin.
#[derive(Debug, Default)]
pub struct MemoryApi {
    stores: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryApi {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn stores(&self) -> MutexGuard<'_, HashMap<String, BTreeMap<String, Vec<u8>>>> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HostApi for MemoryApi {
    fn server_version(&self, _plugin_id: &str) -> Result<String, RemoteError> {
        Ok(env!("CARGO_PKG_VERSION").to_owned())
    }

    fn log(&self, plugin_id: &str, level: LogLevel, message: &str) -> Result<(), RemoteError> {
        match level {
            LogLevel::Debug => debug!(target: API_TARGET, plugin = %plugin_id, "{message}"),
            LogLevel::Info => info!(target: API_TARGET, plugin = %plugin_id, "{message}"),
            LogLevel::Warn => warn!(target: API_TARGET, plugin = %plugin_id, "{message}"),
            LogLevel::Error => error!(target: API_TARGET, plugin = %plugin_id, "{message}"),
        }
        Ok(())
    }

    fn kv_get(&self, plugin_id: &str, key: &str) -> Result<Option<Vec<u8>>, RemoteError> {
        Ok(self
            .stores()
            .get(plugin_id)
            .and_then(|store| store.get(key))
            .cloned())
    }

    fn kv_set(&self, plugin_id: &str, key: &str, value: &[u8]) -> Result<(), RemoteError> {
        if key.is_empty() {
            return Err(RemoteError::bad_request("key must not be empty"));
        }
        self.stores()
            .entry(plugin_id.to_owned())
            .or_default()
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn kv_delete(&self, plugin_id: &str, key: &str) -> Result<(), RemoteError> {
        if let Some(store) = self.stores().get_mut(plugin_id) {
            store.remove(key);
        }
        Ok(())
    }

    fn kv_list(&self, plugin_id: &str) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .stores()
            .get(plugin_id)
            .map(|store| {
                store
                    .keys()
                    .filter(|key| !key.starts_with(INTERNAL_KEY_PREFIX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// [`HostDriver`] for hosts without a database.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDriver;

impl HostDriver for DisabledDriver {
    fn exec(
        &self,
        _plugin_id: &str,
        _statement: &str,
        _params: &[Value],
    ) -> Result<u64, RemoteError> {
        Err(RemoteError::not_implemented("unsupported: no database driver configured"))
    }

    fn query(
        &self,
        _plugin_id: &str,
        _statement: &str,
        _params: &[Value],
    ) -> Result<Vec<Row>, RemoteError> {
        Err(RemoteError::not_implemented("unsupported: no database driver configured"))
    }
}

/// The capability implementations shared by every plugin session.
#[derive(Clone)]
pub struct HostServices {
    api: Arc<dyn HostApi>,
    driver: Arc<dyn HostDriver>,
}

impl HostServices {
    /// Bundles an API and a driver.
    #[must_use]
    pub fn new(api: Arc<dyn HostApi>, driver: Arc<dyn HostDriver>) -> Self {
        Self { api, driver }
    }

    /// Builds the dispatcher answering calls from `plugin_id`.
    #[must_use]
    pub fn dispatcher_for(&self, plugin_id: &str) -> Arc<dyn Dispatcher> {
        Arc::new(HostDispatcher {
            plugin_id: plugin_id.to_owned(),
            services: self.clone(),
        })
    }
}

impl Default for HostServices {
    fn default() -> Self {
        Self::new(Arc::new(MemoryApi::new()), Arc::new(DisabledDriver))
    }
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices").finish_non_exhaustive()
    }
}

/// Routes `api` and `driver` calls from one plugin to the host services.
struct HostDispatcher {
    plugin_id: String,
    services: HostServices,
}

impl HostDispatcher {
    fn api(&self, request: ApiRequest) -> Result<Value, RemoteError> {
        let api = &self.services.api;
        let id = self.plugin_id.as_str();
        match request {
            ApiRequest::ServerVersion => encode(api.server_version(id)?),
            ApiRequest::Log { level, message } => api.log(id, level, &message).map(|()| Value::Null),
            ApiRequest::KvGet { key } => encode(api.kv_get(id, &key)?),
            ApiRequest::KvSet { key, value } => api.kv_set(id, &key, &value).map(|()| Value::Null),
            ApiRequest::KvDelete { key } => api.kv_delete(id, &key).map(|()| Value::Null),
            ApiRequest::KvList => encode(api.kv_list(id)?),
        }
    }

    fn driver(&self, request: DriverRequest) -> Result<Value, RemoteError> {
        let driver = &self.services.driver;
        let id = self.plugin_id.as_str();
        match request {
            DriverRequest::Exec { statement, params } => {
                encode(driver.exec(id, &statement, &params)?)
            }
            DriverRequest::Query { statement, params } => {
                encode(driver.query(id, &statement, &params)?)
            }
        }
    }
}

impl Dispatcher for HostDispatcher {
    fn dispatch(&self, request: Request) -> Result<Value, RemoteError> {
        match request {
            Request::Api(call) => self.api(call),
            Request::Driver(call) => self.driver(call),
            Request::Hooks(_) => Err(RemoteError::not_implemented(
                "the host does not serve hooks",
            )),
        }
    }
}

fn encode<T: Serialize>(value: T) -> Result<Value, RemoteError> {
    serde_json::to_value(value).map_err(|error| RemoteError::failed(error.to_string()))
}
