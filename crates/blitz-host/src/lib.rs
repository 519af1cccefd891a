//! # blitz-host
//!
//! Everything that touches the host machine:
//!
//! - [`process`]: [`ProcessRunner`] trait and the `tokio::process` implementation
//! - [`executor`]: [`ProcessExecutor`], the [`CommandExecutor`](blitz_core::CommandExecutor)
//!   used for allowlisted commands
//! - [`media`], [`bluetooth`], [`wifi`]: [`SnapshotSource`](blitz_core::SnapshotSource)
//!   implementations backed by `playerctl`, `bluetoothctl`, `nmcli`, and `iw`
//! - [`artwork`]: cover art resolution into `data:` URIs
//!
//! Output parsers are plain functions so they can be tested without the tools installed.

#![deny(unsafe_code)]

pub mod artwork;
pub mod bluetooth;
pub mod errors;
pub mod executor;
pub mod media;
pub mod process;
pub mod wifi;

#[cfg(test)]
pub(crate) mod testing;

pub use artwork::ArtworkResolver;
pub use bluetooth::BluetoothctlSource;
pub use errors::ProcessError;
pub use executor::ProcessExecutor;
pub use media::PlayerctlSource;
pub use process::{ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use wifi::NmcliWifiSource;
