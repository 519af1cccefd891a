//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use blitz_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Configuration for the Blitz server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind (default `8765`, `0` auto-assigns).
    pub port: u16,
    /// Directory served for every non-API path.
    pub static_dir: Option<PathBuf>,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Per-client outbound queue capacity.
    pub queue_capacity: usize,
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence in milliseconds after which an unresponsive client is dropped.
    pub heartbeat_timeout_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Deadline for an allowlisted command in milliseconds.
    pub command_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8765,
            static_dir: Some(PathBuf::from("web")),
            max_connections: 64,
            queue_capacity: 100,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 64 * 1024,
            command_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Heartbeat ping period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    /// Silence tolerated before disconnecting.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Command execution deadline.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(settings: &ServerSettings) -> Self {
        let static_dir = (!settings.static_dir.is_empty())
            .then(|| PathBuf::from(&settings.static_dir));
        Self {
            host: settings.host.clone(),
            port: settings.port,
            static_dir,
            max_connections: settings.max_connections,
            queue_capacity: settings.queue_capacity,
            heartbeat_interval_ms: settings.heartbeat_interval_ms,
            heartbeat_timeout_ms: settings.heartbeat_timeout_ms,
            max_message_size: settings.max_message_size,
            command_timeout_ms: settings.command_timeout_ms,
        }
    }
}
