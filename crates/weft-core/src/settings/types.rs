//! Settings types with compiled defaults.

use serde::{Deserialize, Serialize};

use super::errors::{Result, SettingsError};
use crate::constants::{HOME_DIR_NAME, NAME, VERSION};

/// Top-level settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WeftSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name.
    pub name: String,
    /// Tick loop and evaluation limits.
    pub runtime: RuntimeSettings,
    /// Session store selection.
    pub persistence: PersistenceSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for WeftSettings {
    fn default() -> Self {
        Self {
            version: VERSION.to_owned(),
            name: NAME.to_owned(),
            runtime: RuntimeSettings::default(),
            persistence: PersistenceSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Limits applied by the session tick loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Maximum ticks per execution before the loop stops regardless of votes.
    pub max_ticks: u32,
    /// Maximum suspended passes while stabilizing one evaluation.
    pub max_suspensions: u32,
    /// Per-fetch timeout for async data hooks.
    pub fetch_timeout_ms: u64,
    /// Keep at most this many timeline entries (oldest dropped first).
    pub max_timeline_entries: Option<usize>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_ticks: 100,
            max_suspensions: 32,
            fetch_timeout_ms: 30_000,
            max_timeline_entries: None,
        }
    }
}

impl RuntimeSettings {
    /// Reject limits the tick loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key, message: &str| {
            Err(SettingsError::Invalid {
                key,
                message: message.to_owned(),
            })
        };
        if self.max_ticks == 0 {
            return invalid("runtime.maxTicks", "must be at least 1");
        }
        if self.fetch_timeout_ms == 0 {
            return invalid("runtime.fetchTimeoutMs", "must be positive");
        }
        if self.max_timeline_entries == Some(0) {
            return invalid("runtime.maxTimelineEntries", "must be at least 1 when set");
        }
        Ok(())
    }
}

/// Which session store backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local, lost on exit.
    #[default]
    Memory,
    /// `SQLite` file.
    Sqlite,
}

/// Session store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistenceSettings {
    /// Backend selection.
    pub backend: StoreBackend,
    /// Database file for the `SQLite` backend.
    pub sqlite_path: String,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            backend: StoreBackend::Memory,
            sqlite_path: format!("{home}/{HOME_DIR_NAME}/sessions.db"),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`EnvFilter` syntax).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(WeftSettings::default()).unwrap();
        assert_eq!(value["runtime"]["maxTicks"], 100);
        assert_eq!(value["runtime"]["fetchTimeoutMs"], 30_000);
        assert_eq!(value["persistence"]["backend"], "memory");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: WeftSettings =
            serde_json::from_value(json!({"runtime": {"maxTicks": 5}})).unwrap();
        assert_eq!(settings.runtime.max_ticks, 5);
        assert_eq!(settings.runtime.max_suspensions, 32);
        assert_eq!(settings.logging, LoggingSettings::default());
    }

    #[test]
    fn zero_limits_are_rejected() {
        assert!(RuntimeSettings::default().validate().is_ok());
        let zero_ticks = RuntimeSettings {
            max_ticks: 0,
            ..RuntimeSettings::default()
        };
        assert!(matches!(
            zero_ticks.validate(),
            Err(SettingsError::Invalid { key: "runtime.maxTicks", .. })
        ));
        let empty_timeline = RuntimeSettings {
            max_timeline_entries: Some(0),
            ..RuntimeSettings::default()
        };
        assert!(empty_timeline.validate().is_err());
    }

    #[test]
    fn sqlite_path_under_home_dir() {
        assert!(PersistenceSettings::default().sqlite_path.ends_with(".weft/sessions.db"));
    }
}
