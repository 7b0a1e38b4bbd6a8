//! Descriptor telling a host how to reach a running plugin process.

use camino::Utf8PathBuf;
use plexus_config::SocketEndpoint;
use serde::{Deserialize, Serialize};

use crate::handshake::PROTOCOL_VERSION;

/// Framing protocol spoken on the session connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireProtocol {
    /// Newline-delimited JSON frames.
    #[default]
    Jsonl,
}

/// Paths to TLS material for an encrypted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsMaterial {
    /// CA bundle used to verify the plugin.
    pub ca_bundle: Utf8PathBuf,
    /// Client certificate presented to the plugin.
    pub certificate: Utf8PathBuf,
    /// Private key for `certificate`.
    pub key: Utf8PathBuf,
}

/// Connection details for an already-running plugin process.
///
/// A serving plugin publishes one of these; a host consumes it to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReattachConfig {
    /// Framing protocol.
    #[serde(default)]
    pub protocol: WireProtocol,
    /// Protocol version the plugin speaks.
    pub protocol_version: u32,
    /// Where the plugin listens.
    pub addr: SocketEndpoint,
    /// Process id used for liveness checks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Optional TLS material.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsMaterial>,
    /// Whether the descriptor came from a testing bootstrap.
    #[serde(default)]
    pub test: bool,
}

impl ReattachConfig {
    /// Descriptor for a plugin listening on `addr` with the current protocol.
    #[must_use]
    pub const fn new(addr: SocketEndpoint) -> Self {
        Self {
            protocol: WireProtocol::Jsonl,
            protocol_version: PROTOCOL_VERSION,
            addr,
            pid: None,
            tls: None,
            test: false,
        }
    }

    /// Records the serving process id.
    #[must_use]
    pub const fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Marks the descriptor as published by a testing bootstrap.
    #[must_use]
    pub const fn for_testing(mut self) -> Self {
        self.test = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn serialises_documented_shape() {
        let config = ReattachConfig::new(SocketEndpoint::tcp("127.0.0.1", 4100)).with_pid(42);

        let value = serde_json::to_value(&config).expect("serialise");

        assert_eq!(
            value,
            json!({
                "protocol": "jsonl",
                "protocol_version": PROTOCOL_VERSION,
                "addr": { "transport": "tcp", "host": "127.0.0.1", "port": 4100 },
                "pid": 42,
                "test": false,
            })
        );
    }

    #[test]
    fn minimal_descriptor_defaults_optional_fields() {
        let config: ReattachConfig = serde_json::from_value(json!({
            "protocol_version": 1,
            "addr": { "transport": "unix", "path": "/tmp/p.sock" },
        }))
        .expect("deserialise");

        assert_eq!(config.protocol, WireProtocol::Jsonl);
        assert_eq!(config.addr, SocketEndpoint::unix("/tmp/p.sock"));
        assert_eq!(config.pid, None);
        assert!(config.tls.is_none());
        assert!(!config.test);
    }

    #[test]
    fn unknown_protocols_are_rejected() {
        let result = serde_json::from_value::<ReattachConfig>(json!({
            "protocol": "grpc",
            "protocol_version": 1,
            "addr": { "transport": "tcp", "host": "h", "port": 1 },
        }));

        assert!(result.is_err());
    }
}
