//! # chatter-settings
//!
//! Operator settings for the Chatter relay and client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ChatterSettings::default()`]
//! 2. **Settings file**: `~/.chatter/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `CHATTER_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use chatter_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("relay port: {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;
