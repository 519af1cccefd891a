//! # blitz-settings
//!
//! Configuration for the Blitz daemon, loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`BlitzSettings::default()`]
//! 2. **User file**: `~/.blitz/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `BLITZ_*` overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
