//! # blitz-core
//!
//! Shared vocabulary for the Blitz remote-control daemon:
//!
//! - **Protocol**: [`ServerMessage`] envelope and the inbound [`ClientCommand`]
//! - **Snapshots**: media, Bluetooth, and Wi-Fi state broadcast to every client
//! - **Capabilities**: [`SnapshotSource`] and [`CommandExecutor`] traits implemented
//!   by the host layer and faked in tests
//! - **Errors**: [`SourceError`] and [`ExecutionError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod errors;
pub mod exec;
pub mod logging;
pub mod protocol;
pub mod snapshot;
pub mod source;

pub use errors::{ExecutionError, SourceError};
pub use exec::{CommandExecutor, Invocation, LaunchMode};
pub use protocol::{ClientCommand, CommandParseError, ServerMessage, Status};
pub use snapshot::{
    BATTERY_UNAVAILABLE, BluetoothDevice, MediaSnapshot, PlaybackStatus, Snapshot, SnapshotKind,
    WifiSnapshot,
};
pub use source::SnapshotSource;
