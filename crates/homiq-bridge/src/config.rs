//! Bridge server configuration

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// TCP server settings; changes take effect on restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Listen address
    pub host: String,
    /// Listen port; 0 picks a free port
    pub port: u16,
    /// TCP keepalive probe interval
    pub keep_alive_interval_ms: u64,
    /// Close connections idle for this long
    pub connection_timeout_ms: u64,
    /// Advisory client limit; exceeding it only logs a warning
    pub max_clients: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4001,
            keep_alive_interval_ms: 15_000,
            connection_timeout_ms: 20_000,
            max_clients: 10,
        }
    }
}

impl ServerConfig {
    /// `host:port` to bind
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Parsed bind address, if `host` is a literal IP
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.bind_addr().parse().ok()
    }

    /// Keepalive interval
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    /// Idle timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}
