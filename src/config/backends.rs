//! Downstream capability addresses and call timeouts.

use std::time::Duration;

use serde::Deserialize;

/// Addresses of the capabilities the gateway fronts.
///
/// HTTP backends are base URLs; the capability path (`/authenticate`,
/// `/log`, `/send`) is appended by the transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Authentication capability base URL.
    pub auth_url: String,
    /// Logging capability base URL (HTTP flavour).
    pub logger_url: String,
    /// Mail capability base URL.
    pub mail_url: String,
    /// Logging capability, lightweight-RPC flavour (host:port).
    pub rpc_address: String,
    /// Remote procedure invoked for log writes over lightweight RPC.
    pub rpc_method: String,
    /// Logging capability, schema-RPC flavour.
    pub grpc_address: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            auth_url: "http://authentication-service".to_string(),
            logger_url: "http://logger-service".to_string(),
            mail_url: "http://mailer-service".to_string(),
            rpc_address: "logger-service:5001".to_string(),
            rpc_method: "RPCServer.LogInfo".to_string(),
            grpc_address: "http://logger-service:50001".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for a single backend call, in milliseconds.
    pub dispatch_ms: u64,
    /// Upper bound for establishing a backend connection, in milliseconds.
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dispatch_ms: 5000,
            connect_ms: 2000,
        }
    }
}

impl TimeoutConfig {
    pub fn dispatch(&self) -> Duration {
        Duration::from_millis(self.dispatch_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}
