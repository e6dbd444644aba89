//! # whist-settings
//!
//! Layered configuration for the Whist launcher.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WhistSettings::default()`]
//! 2. **User file**: `~/.whist/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WHIST_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, whist_home};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<WhistSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads `~/.whist/settings.json` with env var overrides,
/// falling back to compiled defaults if loading fails.
pub fn get_settings() -> &'static WhistSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WhistSettings) -> std::result::Result<(), WhistSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
