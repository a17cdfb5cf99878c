use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fleet::DeviceConfig;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings I/O error")]
    Io(#[from] std::io::Error),
    #[error("Settings serialization error")]
    Json(#[from] serde_json::Error),
}

/// Fleet-wide flags persisted alongside the per-device table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub discovery_enabled: bool,
    pub load_reporting_mode: i32,
    pub metering_authority: i32,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            discovery_enabled: true,
            load_reporting_mode: 0,
            metering_authority: 0,
        }
    }
}

/// Persistence boundary for device and global configuration. Devices
/// are keyed by the colon-free lowercase MAC form so the keys are safe
/// in file names and bus topics.
pub trait SettingsStore: Send + Sync {
    fn load_devices(&self) -> Result<HashMap<String, DeviceConfig>, SettingsError>;
    fn save_device(&self, id: &str, cfg: &DeviceConfig) -> Result<(), SettingsError>;
    fn load_globals(&self) -> Result<GlobalSettings, SettingsError>;
    fn save_globals(&self, globals: &GlobalSettings) -> Result<(), SettingsError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct SettingsFile {
    globals: GlobalSettings,
    devices: HashMap<String, DeviceConfig>,
}

/// File-backed store: one JSON document holding globals plus the
/// device table, rewritten whole on every save.
pub struct JsonSettingsStore {
    path: PathBuf,
    cache: Mutex<SettingsFile>,
}

impl JsonSettingsStore {
    /// Open or create the settings file. A missing file yields
    /// defaults; a corrupt one is an error so a bad write never
    /// silently wipes the fleet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let cache = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            SettingsFile::default()
        };
        Ok(Self {
            path,
            cache: Mutex::new(cache),
        })
    }

    /// Write to a sibling temp file and rename over the target, so a
    /// crash mid-write never leaves a truncated document behind.
    fn persist(&self, file: &SettingsFile) -> Result<(), SettingsError> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(file)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load_devices(&self) -> Result<HashMap<String, DeviceConfig>, SettingsError> {
        let cache = self.cache.lock().expect("settings lock poisoned");
        Ok(cache.devices.clone())
    }

    fn save_device(&self, id: &str, cfg: &DeviceConfig) -> Result<(), SettingsError> {
        let mut cache = self.cache.lock().expect("settings lock poisoned");
        cache.devices.insert(id.to_string(), cfg.clone());
        self.persist(&cache)
    }

    fn load_globals(&self) -> Result<GlobalSettings, SettingsError> {
        let cache = self.cache.lock().expect("settings lock poisoned");
        Ok(cache.globals.clone())
    }

    fn save_globals(&self, globals: &GlobalSettings) -> Result<(), SettingsError> {
        let mut cache = self.cache.lock().expect("settings lock poisoned");
        cache.globals = globals.clone();
        self.persist(&cache)
    }
}

/// Volatile store for tests and simulations.
#[derive(Default)]
pub struct InMemorySettings {
    state: Mutex<SettingsFile>,
}

impl SettingsStore for InMemorySettings {
    fn load_devices(&self) -> Result<HashMap<String, DeviceConfig>, SettingsError> {
        Ok(self.state.lock().expect("settings lock poisoned").devices.clone())
    }

    fn save_device(&self, id: &str, cfg: &DeviceConfig) -> Result<(), SettingsError> {
        self.state
            .lock()
            .expect("settings lock poisoned")
            .devices
            .insert(id.to_string(), cfg.clone());
        Ok(())
    }

    fn load_globals(&self) -> Result<GlobalSettings, SettingsError> {
        Ok(self.state.lock().expect("settings lock poisoned").globals.clone())
    }

    fn save_globals(&self, globals: &GlobalSettings) -> Result<(), SettingsError> {
        self.state.lock().expect("settings lock poisoned").globals = globals.clone();
        Ok(())
    }
}
