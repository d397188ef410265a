//! Layered runtime settings.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`WeftSettings::default()`]
//! 2. **User file** — `~/.weft/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `WEFT_*` overrides (highest priority)

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{LoggingSettings, PersistenceSettings, RuntimeSettings, StoreBackend, WeftSettings};

use std::sync::OnceLock;

static SETTINGS: OnceLock<WeftSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from disk with env var overrides. If
/// loading fails, compiled defaults are used.
pub fn get_settings() -> &'static WeftSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: WeftSettings) -> std::result::Result<(), WeftSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        let settings = WeftSettings::default();
        assert_eq!(settings.name, "weft");
        assert_eq!(settings.runtime.max_ticks, 100);
        assert_eq!(settings.runtime.max_suspensions, 32);
        assert!(settings.runtime.max_timeline_entries.is_none());
        assert_eq!(settings.persistence.backend, StoreBackend::Memory);
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    fn global_settings_are_stable() {
        let a = get_settings();
        let b = get_settings();
        assert!(std::ptr::eq(a, b));
    }
}
