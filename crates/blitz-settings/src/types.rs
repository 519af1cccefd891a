//! Settings types with compiled defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlitzSettings {
    /// Network and session settings.
    pub server: ServerSettings,
    /// Snapshot poller cadence.
    pub pollers: PollerSettings,
    /// Launchable applications: command name to argv.
    ///
    /// An empty argv disables an entry inherited from the defaults.
    pub apps: BTreeMap<String, Vec<String>>,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl Default for BlitzSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            pollers: PollerSettings::default(),
            apps: default_apps(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Server network and session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Directory served for non-API paths. Empty disables static files.
    pub static_dir: String,
    /// Upper bound on concurrently connected clients.
    pub max_connections: usize,
    /// Per-client outbound queue capacity.
    pub queue_capacity: usize,
    /// Interval between heartbeat pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Silence after which a client is dropped, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Deadline for an allowlisted command in milliseconds.
    pub command_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            static_dir: "web".to_string(),
            max_connections: 64,
            queue_capacity: 100,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 60_000,
            max_message_size: 64 * 1024,
            command_timeout_ms: 10_000,
        }
    }
}

/// One poller's schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerEntry {
    /// Whether the poller runs at all.
    pub enabled: bool,
    /// Period in milliseconds.
    pub interval_ms: u64,
}

impl PollerEntry {
    const fn every(interval_ms: u64) -> Self {
        Self {
            enabled: true,
            interval_ms,
        }
    }
}

/// Poller schedules per snapshot source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollerSettings {
    /// Media player poller.
    pub media: PollerEntry,
    /// Bluetooth device poller.
    pub bluetooth: PollerEntry,
    /// Wi-Fi poller.
    pub wifi: PollerEntry,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            media: PollerEntry::every(1_000),
            bluetooth: PollerEntry::every(5_000),
            wifi: PollerEntry::every(3_000),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn default_apps() -> BTreeMap<String, Vec<String>> {
    [
        ("open_firefox", vec!["firefox", "--new-window"]),
        ("open_edge", vec!["microsoft-edge-beta"]),
        ("open_vscode", vec!["code-insiders"]),
        ("open_postman", vec!["postman"]),
    ]
    .into_iter()
    .map(|(name, argv)| {
        (
            name.to_string(),
            argv.into_iter().map(str::to_string).collect(),
        )
    })
    .collect()
}

impl BlitzSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.max_connections == 0 {
            return Err(invalid("server.maxConnections must be at least 1"));
        }
        if server.queue_capacity == 0 {
            return Err(invalid("server.queueCapacity must be at least 1"));
        }
        if server.heartbeat_interval_ms == 0 {
            return Err(invalid("server.heartbeatIntervalMs must be positive"));
        }
        if server.heartbeat_timeout_ms < server.heartbeat_interval_ms {
            return Err(invalid(
                "server.heartbeatTimeoutMs must not be shorter than the heartbeat interval",
            ));
        }
        if server.command_timeout_ms == 0 {
            return Err(invalid("server.commandTimeoutMs must be positive"));
        }
        for (name, entry) in [
            ("media", self.pollers.media),
            ("bluetooth", self.pollers.bluetooth),
            ("wifi", self.pollers.wifi),
        ] {
            if entry.enabled && entry.interval_ms == 0 {
                return Err(invalid(format!(
                    "pollers.{name}.intervalMs must be positive"
                )));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> SettingsError {
    SettingsError::InvalidValue(message.into())
}
