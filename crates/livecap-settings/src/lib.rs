//! # livecap-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LivecapSettings::default()`]
//! 2. **User file**: `~/.livecap/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LIVECAP_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::{Arc, OnceLock};

static SETTINGS: OnceLock<Arc<LivecapSettings>> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.livecap/settings.json` with env var
/// overrides. If loading fails, falls back to compiled defaults.
pub fn get_settings() -> Arc<LivecapSettings> {
    Arc::clone(SETTINGS.get_or_init(|| {
        Arc::new(match load_settings() {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load settings, using defaults");
                LivecapSettings::default()
            }
        })
    }))
}

/// Install an explicit settings value as the global instance.
///
/// Returns `false` if settings were already initialized.
pub fn init_settings(settings: LivecapSettings) -> bool {
    SETTINGS.set(Arc::new(settings)).is_ok()
}
