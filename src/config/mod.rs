//! Persistent backend settings.
//!
//! This module provides settings management with XDG Base Directory
//! compliance.

pub mod settings;

pub use settings::{BackendSettings, SettingsError, SettingsManager, get_config_path};
