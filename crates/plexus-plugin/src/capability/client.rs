//! RPC-backed capability handles.

use std::time::Duration;

use serde_json::Value;

use super::{Api, CapabilityError, Driver, LogLevel, Row};
use crate::rpc::RpcChannel;
use crate::wire::{ApiRequest, DriverRequest, Request};

/// [`Api`] implementation that forwards every call to the host.
#[derive(Debug, Clone)]
pub struct ApiClient {
    channel: RpcChannel,
    timeout: Duration,
}

impl ApiClient {
    /// Wraps a session channel; each call waits at most `timeout`.
    #[must_use]
    pub const fn new(channel: RpcChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }

    fn call<T: serde::de::DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, CapabilityError> {
        Ok(self.channel.call(Request::Api(request), self.timeout)?)
    }
}

impl Api for ApiClient {
    fn server_version(&self) -> Result<String, CapabilityError> {
        self.call(ApiRequest::ServerVersion)
    }

    fn log(&self, level: LogLevel, message: &str) -> Result<(), CapabilityError> {
        self.call(ApiRequest::Log {
            level,
            message: message.to_owned(),
        })
    }

    fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, CapabilityError> {
        self.call(ApiRequest::KvGet {
            key: key.to_owned(),
        })
    }

    fn kv_set(&self, key: &str, value: &[u8]) -> Result<(), CapabilityError> {
        self.call(ApiRequest::KvSet {
            key: key.to_owned(),
            value: value.to_vec(),
        })
    }

    fn kv_delete(&self, key: &str) -> Result<(), CapabilityError> {
        self.call(ApiRequest::KvDelete {
            key: key.to_owned(),
        })
    }

    fn kv_list(&self) -> Result<Vec<String>, CapabilityError> {
        self.call(ApiRequest::KvList)
    }
}

/// [`Driver`] implementation that forwards statements to the host.
#[derive(Debug, Clone)]
pub struct DriverClient {
    channel: RpcChannel,
    timeout: Duration,
}

impl DriverClient {
    /// Wraps a session channel; each call waits at most `timeout`.
    #[must_use]
    pub const fn new(channel: RpcChannel, timeout: Duration) -> Self {
        Self { channel, timeout }
    }
}

impl Driver for DriverClient {
    fn exec(&self, statement: &str, params: &[Value]) -> Result<u64, CapabilityError> {
        let request = DriverRequest::Exec {
            statement: statement.to_owned(),
            params: params.to_vec(),
        };
        Ok(self.channel.call(Request::Driver(request), self.timeout)?)
    }

    fn query(&self, statement: &str, params: &[Value]) -> Result<Vec<Row>, CapabilityError> {
        let request = DriverRequest::Query {
            statement: statement.to_owned(),
            params: params.to_vec(),
        };
        Ok(self.channel.call(Request::Driver(request), self.timeout)?)
    }
}
