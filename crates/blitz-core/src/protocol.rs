//! Wire protocol between the daemon and browser clients.
//!
//! Every frame the server writes is a JSON-encoded [`ServerMessage`]. Every
//! frame a client writes is a JSON object with a `command` field plus optional
//! parameters, parsed at the boundary into a [`ClientCommand`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// What a [`ServerMessage`] carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// A command succeeded, or the connection was accepted.
    Success,
    /// A command was rejected or failed.
    Error,
    /// Media player snapshot.
    Player,
    /// Connected Bluetooth devices.
    Bluetooth,
    /// Wi-Fi connection snapshot.
    Wifi,
}

impl Status {
    /// Wire name, also used as a log field.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Player => "player",
            Self::Bluetooth => "bluetooth",
            Self::Wifi => "wifi",
        }
    }
}

/// Outbound envelope.
///
/// Built once and shared as `Arc<ServerMessage>` across every session queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    /// Message kind.
    pub status: Status,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Echo of the command name for command responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Snapshot or command result payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ServerMessage {
    /// Bare message with only a status.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            message: None,
            command: None,
            data: None,
        }
    }

    /// Successful command response echoing `command`.
    pub fn success(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::new(Status::Success)
        }
    }

    /// Error response with a human-readable reason.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error).with_message(message)
    }

    /// First frame written to a freshly accepted connection.
    pub fn welcome(client_id: &str) -> Self {
        Self::new(Status::Success)
            .with_message("connected")
            .with_data(serde_json::json!({ "clientId": client_id }))
    }

    /// Attach a message string.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inbound commands
// ─────────────────────────────────────────────────────────────────────────────

/// Why an inbound frame could not be read as a command.
#[derive(Debug, Error)]
pub enum CommandParseError {
    /// Frame is not JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// Frame is JSON but not an object.
    #[error("expected a JSON object")]
    NotAnObject,
    /// Object has no `command` field.
    #[error("missing \"command\" field")]
    MissingCommand,
    /// `command` is present but not a string.
    #[error("\"command\" must be a string")]
    CommandNotString,
    /// `command` is an empty string.
    #[error("\"command\" must not be empty")]
    EmptyCommand,
}

/// A parsed client command: its name plus every other field as parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct ClientCommand {
    /// Command name, matched case-sensitively against the allowlist.
    pub name: String,
    /// Remaining top-level fields.
    pub params: Map<String, Value>,
}

impl ClientCommand {
    /// Command with no parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_param(mut self, key: &str, value: Value) -> Self {
        let _ = self.params.insert(key.to_owned(), value);
        self
    }

    /// Parse a text frame.
    pub fn parse(text: &str) -> Result<Self, CommandParseError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Object(mut params) = value else {
            return Err(CommandParseError::NotAnObject);
        };
        let name = match params.remove("command") {
            None => return Err(CommandParseError::MissingCommand),
            Some(Value::String(name)) => name,
            Some(_) => return Err(CommandParseError::CommandNotString),
        };
        if name.is_empty() {
            return Err(CommandParseError::EmptyCommand);
        }
        Ok(Self { name, params })
    }

    /// Typed view of one parameter. `Ok(None)` when absent or `null`.
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => T::deserialize(value).map(Some),
        }
    }
}
