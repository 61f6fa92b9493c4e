//! # Configuration Management Module
//!
//! Persistent application settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `api_level`: platform version, mapped once to a `PlatformTier`
//! - `target_device_name`: advertised name to scan for
//! - `scan_mode` / `report_delay_ms`: radio tuning
//! - `pre_granted`: permissions treated as already granted at startup
//! - `max_listed_devices`: length of the recent discoveries list
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/feather-scan/config.toml
//! - Linux: ~/.config/feather-scan/config.toml
//! - Windows: %APPDATA%\feather-scan\config.toml

use crate::error::ConfigError;
use crate::permission::{PermissionKind, PlatformTier, RUNTIME_BLUETOOTH_API_LEVEL};
use crate::radio::{ScanFilter, ScanMode, ScanSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_DEVICE_NAME: &str = "Feather nRF52840 Express";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_level: u32,
    pub target_device_name: String,
    pub scan_mode: ScanMode,
    pub report_delay_ms: u64,
    pub pre_granted: Vec<PermissionKind>,
    pub max_listed_devices: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_level: RUNTIME_BLUETOOTH_API_LEVEL,
            target_device_name: DEFAULT_DEVICE_NAME.to_string(),
            scan_mode: ScanMode::LowPower,
            report_delay_ms: 0,
            pre_granted: Vec::new(),
            max_listed_devices: 50,
        }
    }
}

impl Config {
    /// Get the path to the config file
    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feather-scan")
            .join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, or create it with defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, writing defaults", path.display());
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn platform_tier(&self) -> PlatformTier {
        PlatformTier::from_api_level(self.api_level)
    }

    pub fn scan_filters(&self) -> Vec<ScanFilter> {
        vec![ScanFilter::by_name(self.target_device_name.clone())]
    }

    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            mode: self.scan_mode,
            report_delay: Duration::from_millis(self.report_delay_ms),
        }
    }
}
