//! # Sync Configuration
//!
//! ```text
//! defaults ──► sync.toml ──► STOCKROOM_* environment ──► validate()
//!  (lowest)                                  (highest)
//!
//! sync.toml lives in the platform config dir:
//!   Linux   ~/.config/stockroom/sync.toml
//!   macOS   ~/Library/Application Support/com.stockroom.stockroom/sync.toml
//! ```
//!
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Stockroom Tablet 2"
//!
//! [sync]
//! mode = "automatic"          # automatic | manual | offline
//! max_retries = 3
//! drain_on_enqueue = true
//! drain_on_foreground = true
//! purge_on_background = true
//!
//! [database]
//! path = "/var/lib/stockroom/stockroom.db"
//! ```
//!
//! Every table and key is optional; missing ones take their defaults.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use stockroom_core::DEFAULT_MAX_RETRIES;

const ENV_DEVICE_ID: &str = "STOCKROOM_DEVICE_ID";
const ENV_DEVICE_NAME: &str = "STOCKROOM_DEVICE_NAME";
const ENV_SYNC_MODE: &str = "STOCKROOM_SYNC_MODE";
const ENV_MAX_RETRIES: &str = "STOCKROOM_MAX_RETRIES";
const ENV_DB_PATH: &str = "STOCKROOM_DB_PATH";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "stockroom", "stockroom")
}

// =============================================================================
// SyncMode
// =============================================================================

/// Which triggers the sync agent honors.
///
/// ```text
/// ┌────────────┬──────────┬────────────┬────────────┬────────────┐
/// │ Mode       │ enqueue  │ foreground │ background │ sync_now() │
/// ├────────────┼──────────┼────────────┼────────────┼────────────┤
/// │ AUTOMATIC  │ drain    │ drain      │ drain+purge│ drain      │
/// │ MANUAL     │ -        │ -          │ purge      │ drain      │
/// │ OFFLINE    │ -        │ -          │ purge      │ -          │
/// └────────────┴──────────┴────────────┴────────────┴────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Automatic,
    Manual,
    /// The remote store is never contacted.
    Offline,
}

impl SyncMode {
    pub fn is_automatic(&self) -> bool {
        *self == SyncMode::Automatic
    }

    pub fn is_sync_enabled(&self) -> bool {
        *self != SyncMode::Offline
    }

    fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Automatic => "automatic",
            SyncMode::Manual => "manual",
            SyncMode::Offline => "offline",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    /// Case-insensitive; also accepts `auto` and `disabled`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mode = match s.trim().to_ascii_lowercase().as_str() {
            "automatic" | "auto" => SyncMode::Automatic,
            "manual" => SyncMode::Manual,
            "offline" | "disabled" => SyncMode::Offline,
            _ => {
                return Err(SyncError::InvalidConfig(format!(
                    "unknown sync mode '{s}' (expected automatic, manual or offline)"
                )))
            }
        };
        Ok(mode)
    }
}

// =============================================================================
// Sections
// =============================================================================

/// `[device]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Generated once (UUID v4) and persisted by `save`.
    pub id: String,
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: "Stockroom Device".to_string(),
        }
    }
}

/// `[sync]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub mode: SyncMode,
    /// Failed replays before an operation stops being attempted.
    pub max_retries: u32,
    pub drain_on_enqueue: bool,
    pub drain_on_foreground: bool,
    /// Move exhausted operations to `failed_operations` on background.
    pub purge_on_background: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            mode: SyncMode::Automatic,
            max_retries: DEFAULT_MAX_RETRIES,
            drain_on_enqueue: true,
            drain_on_foreground: true,
            purge_on_background: true,
        }
    }
}

/// `[database]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: Option<PathBuf>,
}

// =============================================================================
// SyncConfig
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub device: DeviceConfig,
    pub sync: SyncSettings,
    pub database: DatabaseSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the effective configuration.
    ///
    /// `config_path` falls back to the platform `sync.toml`; a missing file
    /// is not an error.
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = match config_path.or_else(Self::default_config_path) {
            Some(path) if path.exists() => Self::read_file(&path)?,
            Some(path) => {
                debug!(path = %path.display(), "No sync config file, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// [`load`](Self::load), logging and discarding any error.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        match Self::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Sync config unusable, falling back to defaults");
                Self::default()
            }
        }
    }

    fn read_file(path: &Path) -> SyncResult<Self> {
        info!(path = %path.display(), "Reading sync config");
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Writes the config as TOML, creating parent directories.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let Some(path) = config_path.or_else(Self::default_config_path) else {
            return Err(SyncError::ConfigSaveFailed(
                "no config directory on this platform".into(),
            ));
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, toml::to_string_pretty(self)?)?;

        info!(path = %path.display(), "Sync config written");
        Ok(())
    }

    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }
        if self.sync.max_retries == 0 {
            return Err(SyncError::InvalidConfig("sync.max_retries must be at least 1".into()));
        }
        if matches!(&self.database.path, Some(p) if p.as_os_str().is_empty()) {
            return Err(SyncError::InvalidConfig("database.path is empty".into()));
        }
        Ok(())
    }

    /// Applies `STOCKROOM_*` variables. Unparseable values are logged and
    /// skipped so a typo never blocks startup.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup(ENV_DEVICE_ID) {
            self.device.id = id;
        }
        if let Some(name) = lookup(ENV_DEVICE_NAME) {
            self.device.name = name;
        }
        if let Some(raw) = lookup(ENV_SYNC_MODE) {
            match raw.parse() {
                Ok(mode) => self.sync.mode = mode,
                Err(_) => warn!(value = %raw, "Ignoring {ENV_SYNC_MODE}"),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            match raw.parse() {
                Ok(n) => self.sync.max_retries = n,
                Err(_) => warn!(value = %raw, "Ignoring {ENV_MAX_RETRIES}"),
            }
        }
        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = Some(PathBuf::from(path));
        }

        debug!(
            device_id = %self.device.id,
            mode = %self.sync.mode,
            max_retries = self.sync.max_retries,
            "Sync config resolved"
        );
    }

    fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("sync.toml"))
    }

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn mode(&self) -> SyncMode {
        self.sync.mode
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync.mode.is_sync_enabled()
    }

    /// Configured path, else `<data dir>/stockroom.db`, else `./stockroom.db`.
    pub fn database_path(&self) -> PathBuf {
        if let Some(path) = &self.database.path {
            return path.clone();
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("stockroom.db"))
            .unwrap_or_else(|| PathBuf::from("stockroom.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_sync_mode_parsing() {
        assert_eq!("automatic".parse::<SyncMode>().unwrap(), SyncMode::Automatic);
        assert_eq!("auto".parse::<SyncMode>().unwrap(), SyncMode::Automatic);
        assert_eq!("MANUAL".parse::<SyncMode>().unwrap(), SyncMode::Manual);
        assert_eq!("disabled".parse::<SyncMode>().unwrap(), SyncMode::Offline);
        assert!("sometimes".parse::<SyncMode>().is_err());
        assert_eq!(SyncMode::Offline.to_string(), "offline");
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::new();
        assert!(!config.device_id().is_empty());
        assert_eq!(config.mode(), SyncMode::Automatic);
        assert_eq!(config.sync.max_retries, 3);
        assert!(config.sync.drain_on_enqueue);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let mut config = SyncConfig::default();
        config.sync.max_retries = 0;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.sync.max_retries = 3;
        config.device.id = "  ".into();
        assert!(matches!(config.validate(), Err(SyncError::MissingDeviceId)));

        config.device.id = "tablet".into();
        config.database.path = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env = HashMap::from([
            (ENV_DEVICE_ID, "tablet-7"),
            (ENV_SYNC_MODE, "manual"),
            (ENV_MAX_RETRIES, "5"),
            (ENV_DB_PATH, "/tmp/stockroom-test.db"),
        ]);

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.device_id(), "tablet-7");
        assert_eq!(config.mode(), SyncMode::Manual);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/stockroom-test.db"));
    }

    #[test]
    fn test_unparseable_overrides_are_skipped() {
        let mut config = SyncConfig::default();
        config.apply_overrides(|key| match key {
            ENV_SYNC_MODE => Some("sometimes".into()),
            ENV_MAX_RETRIES => Some("lots".into()),
            _ => None,
        });

        assert_eq!(config.mode(), SyncMode::Automatic);
        assert_eq!(config.sync.max_retries, 3);
    }

    #[test]
    fn test_saved_file_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sync.toml");

        let mut config = SyncConfig::default();
        config.device.name = "Front Desk".into();
        config.sync.mode = SyncMode::Manual;
        config.sync.purge_on_background = false;
        config.save(Some(path.clone())).unwrap();

        let loaded = SyncConfig::read_file(&path).unwrap();
        assert_eq!(loaded.device.id, config.device.id);
        assert_eq!(loaded.device.name, "Front Desk");
        assert_eq!(loaded.sync.mode, SyncMode::Manual);
        assert!(!loaded.sync.purge_on_background);
    }

    #[test]
    fn test_partial_file_fills_in_defaults() {
        let config: SyncConfig = toml::from_str(
            r#"
            [device]
            id = "abc"

            [sync]
            mode = "offline"
            "#,
        )
        .unwrap();

        assert_eq!(config.device.name, "Stockroom Device");
        assert_eq!(config.mode(), SyncMode::Offline);
        assert_eq!(config.sync.max_retries, 3);
        assert!(config.database.path.is_none());
    }
}
