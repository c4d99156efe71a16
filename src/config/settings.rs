//! Backend settings with XDG Base Directory compliance.
//!
//! Settings are stored as pretty-printed JSON in
//! `$XDG_CONFIG_HOME/pipeplay/settings.json` and validated on load and on
//! every update.

use std::{
    env::var,
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::{Path, PathBuf},
    time::Duration,
};

use {
    parking_lot::{RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

use crate::backend::{
    output::OutputConfig,
    thread::{MAX_VOLUME, MIN_VOLUME, ThreadConfig},
};

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write settings file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize settings.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// Serializable backend settings with default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Interval of position notifications while playing, in milliseconds.
    pub tick_interval_ms: u64,
    /// Volume applied at startup (0-100).
    pub default_volume: i32,
    /// Step used by volume up and down.
    pub volume_step: i32,
    /// Main volume while a preview plays, as a percentage of the set volume.
    pub smart_volume_percent: i32,
    /// Output buffer duration in milliseconds.
    pub buffer_duration_ms: u32,
    /// Audio output device name, the host default when unset.
    pub audio_device: Option<String>,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            default_volume: MAX_VOLUME,
            volume_step: 5,
            smart_volume_percent: 30,
            buffer_duration_ms: 50,
            audio_device: None,
        }
    }
}

impl BackendSettings {
    /// Checks every value against its accepted range.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |reason: String| Err(SettingsError::InvalidValue { reason });

        if !(10..=5000).contains(&self.tick_interval_ms) {
            return invalid(format!(
                "tick_interval_ms must be within 10..=5000, got {}",
                self.tick_interval_ms
            ));
        }
        if !(MIN_VOLUME..=MAX_VOLUME).contains(&self.default_volume) {
            return invalid(format!(
                "default_volume must be within {MIN_VOLUME}..={MAX_VOLUME}, got {}",
                self.default_volume
            ));
        }
        if !(1..=MAX_VOLUME).contains(&self.volume_step) {
            return invalid(format!(
                "volume_step must be within 1..={MAX_VOLUME}, got {}",
                self.volume_step
            ));
        }
        if !(0..=100).contains(&self.smart_volume_percent) {
            return invalid(format!(
                "smart_volume_percent must be within 0..=100, got {}",
                self.smart_volume_percent
            ));
        }
        if !(1..=2000).contains(&self.buffer_duration_ms) {
            return invalid(format!(
                "buffer_duration_ms must be within 1..=2000, got {}",
                self.buffer_duration_ms
            ));
        }
        Ok(())
    }

    /// Thread parameters for a backend thread called `name`.
    #[must_use]
    pub fn thread_config(&self, name: &str) -> ThreadConfig {
        ThreadConfig {
            name: name.to_string(),
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            initial_volume: self.default_volume,
        }
    }

    /// Output parameters for the shipped pipeline.
    #[must_use]
    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            device_name: self.audio_device.clone(),
            buffer_duration_ms: self.buffer_duration_ms,
        }
    }
}

/// Handles loading, saving, and validation of backend settings.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe settings storage.
    settings: RwLock<BackendSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
}

impl Clone for SettingsManager {
    fn clone(&self) -> Self {
        Self {
            settings: RwLock::new(self.settings.read().clone()),
            config_path: self.config_path.clone(),
        }
    }
}

impl SettingsManager {
    /// Creates a new settings manager with the default config path.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk or are
    /// out of range.
    pub fn new() -> Result<Self, SettingsError> {
        Self::with_config_path(get_config_path())
    }

    /// Creates a new settings manager with a custom config path.
    ///
    /// A missing file yields the defaults; nothing is written until
    /// [`SettingsManager::update_settings`] is called.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if settings cannot be loaded from disk or are
    /// out of range.
    pub fn with_config_path(config_path: PathBuf) -> Result<Self, SettingsError> {
        let settings = if config_path.exists() {
            debug!("Loading settings from existing file: {:?}", config_path);
            let contents = read_to_string(&config_path)?;
            let settings: BackendSettings = from_str(&contents)?;
            settings.validate()?;
            settings
        } else {
            debug!("No settings file at {:?}, using defaults", config_path);
            BackendSettings::default()
        };

        Ok(SettingsManager {
            settings: RwLock::new(settings),
            config_path,
        })
    }

    /// Gets the current settings.
    pub fn get_settings(&self) -> RwLockReadGuard<'_, BackendSettings> {
        self.settings.read()
    }

    /// Gets the configuration file path.
    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    /// Validates `new_settings`, applies them and saves them to disk.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` without applying anything if a
    /// value is out of range, or an I/O error if saving fails.
    pub fn update_settings(&self, new_settings: BackendSettings) -> Result<(), SettingsError> {
        new_settings.validate()?;
        *self.settings.write() = new_settings;
        self.save_settings()
    }

    fn save_settings(&self) -> Result<(), SettingsError> {
        debug!("Saving settings to file: {:?}", self.config_path);
        if let Some(parent) = self.config_path.parent() {
            create_dir_all(parent)?;
        }
        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;
        Ok(())
    }
}

/// Path of the settings file under the XDG config directory.
#[must_use]
pub fn get_config_path() -> PathBuf {
    let mut config_dir = get_xdg_config_home();
    config_dir.push("pipeplay");
    config_dir.push("settings.json");
    config_dir
}

/// Uses `XDG_CONFIG_HOME` if set, otherwise `$HOME/.config`.
fn get_xdg_config_home() -> PathBuf {
    if let Ok(config_home) = var("XDG_CONFIG_HOME")
        && !config_home.is_empty()
    {
        return PathBuf::from(config_home);
    }

    if let Ok(home) = var("HOME") {
        let mut path = PathBuf::from(home);
        path.push(".config");
        return path;
    }

    PathBuf::from(".")
}
