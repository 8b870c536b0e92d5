//! # Configuration Management Module
//!
//! Persistent settings stored in platform-appropriate locations.
//! Handles loading, saving, and providing defaults for configuration options.
//!
//! ## Settings
//! - `selector`: how discovery picks the peripheral (service, exact name, or any)
//! - `service_uuid` / `characteristic_uuid`: the telemetry endpoint
//! - `scan_seconds`: discovery window
//! - `auto_select_first`: connect to the first match instead of prompting
//! - `recording_seconds` / `grace_millis`: recording window and in-flight grace
//! - `export_dir`: where CSV exports are written
//!
//! ## Storage Location
//! - macOS: ~/Library/Application Support/motion-capture/config.toml
//! - Linux: ~/.config/motion-capture/config.toml
//! - Windows: %APPDATA%\motion-capture\config.toml

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVICE_UUID: &str = "4fafc201-1fb5-459e-8fcc-c5c9c331914b";
pub const DEFAULT_CHARACTERISTIC_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// Longest recording a config file can ask for (one hour)
pub const MAX_RECORDING_SECONDS: u64 = 60 * 60;

/// Discovery filter applied to advertising peripherals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceSelector {
    /// Devices advertising this service UUID
    Service { uuid: String },
    /// Devices whose local name equals this string
    Name { name: String },
    /// Every named device
    Any,
}

impl DeviceSelector {
    /// Whether an advertisement matches this selector.
    ///
    /// UUIDs compare case-insensitively; names compare exactly.
    pub fn matches(&self, local_name: Option<&str>, services: &[String]) -> bool {
        match self {
            DeviceSelector::Service { uuid } => {
                services.iter().any(|s| s.eq_ignore_ascii_case(uuid))
            }
            DeviceSelector::Name { name } => local_name == Some(name.as_str()),
            DeviceSelector::Any => local_name.is_some(),
        }
    }
}

impl Default for DeviceSelector {
    fn default() -> Self {
        DeviceSelector::Service {
            uuid: DEFAULT_SERVICE_UUID.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub scan_seconds: u64,
    pub auto_select_first: bool,
    pub recording_seconds: u64,
    pub grace_millis: u64,
    pub export_dir: PathBuf,
    // Tables serialize after plain values
    pub selector: DeviceSelector,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_uuid: DEFAULT_SERVICE_UUID.to_string(),
            characteristic_uuid: DEFAULT_CHARACTERISTIC_UUID.to_string(),
            scan_seconds: 5,
            auto_select_first: true,
            recording_seconds: 5,
            grace_millis: 250,
            export_dir: PathBuf::from("."),
            selector: DeviceSelector::default(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("motion-capture")
            .join("config.toml")
    }

    /// Load config from the platform location, creating the default if missing
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, or create the default there if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let config = toml::from_str(&contents).map_err(ConfigError::ParseFailed)?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save_to(path)?;
                Ok(config)
            }
            Err(e) => Err(ConfigError::ReadFailed(e)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::WriteFailed)?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        fs::write(path, toml_string).map_err(ConfigError::WriteFailed)?;

        Ok(())
    }

    pub fn scan_window(&self) -> Duration {
        Duration::from_secs(self.scan_seconds)
    }

    /// Recording target, clamped to `1..=MAX_RECORDING_SECONDS`
    pub fn recording_duration(&self) -> Duration {
        Duration::from_secs(self.recording_seconds.clamp(1, MAX_RECORDING_SECONDS))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_uuid, DEFAULT_SERVICE_UUID);
        assert_eq!(config.characteristic_uuid, DEFAULT_CHARACTERISTIC_UUID);
        assert_eq!(config.recording_duration(), Duration::from_secs(5));
        assert!(config.auto_select_first);
    }

    #[test]
    fn test_recording_duration_is_clamped() {
        let config = Config {
            recording_seconds: u64::MAX,
            ..Config::default()
        };
        assert_eq!(
            config.recording_duration(),
            Duration::from_secs(MAX_RECORDING_SECONDS)
        );

        let config: Config = toml::from_str("recording_seconds = 0").expect("Failed to deserialize");
        assert_eq!(config.recording_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_selector_serialization() {
        let config = Config {
            selector: DeviceSelector::Name {
                name: "ESP32-IMU".to_string(),
            },
            ..Config::default()
        };

        let toml_str = toml::to_string(&config).expect("Failed to serialize");
        assert!(toml_str.contains("kind = \"name\""));
        assert!(toml_str.contains("name = \"ESP32-IMU\""));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml_str = r#"
            recording_seconds = 10

            [selector]
            kind = "any"
        "#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");
        assert_eq!(config.selector, DeviceSelector::Any);
        assert_eq!(config.recording_seconds, 10);
        assert_eq!(config.grace_millis, 250);
    }

    #[test]
    fn test_load_creates_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).expect("Failed to load config");
        assert_eq!(config, Config::default());
        assert!(path.exists());

        let reloaded = Config::load_from(&path).expect("Failed to reload config");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "scan_seconds = \"soon\"").unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::ParseFailed(_))
        ));
    }

    #[test]
    fn test_selector_matching() {
        let by_service = DeviceSelector::default();
        let services = vec![DEFAULT_SERVICE_UUID.to_uppercase()];
        assert!(by_service.matches(None, &services));
        assert!(!by_service.matches(Some("ESP32"), &[]));

        let by_name = DeviceSelector::Name {
            name: "ESP32".to_string(),
        };
        assert!(by_name.matches(Some("ESP32"), &[]));
        assert!(!by_name.matches(Some("ESP32-2"), &[]));

        assert!(DeviceSelector::Any.matches(Some("anything"), &[]));
        assert!(!DeviceSelector::Any.matches(None, &[]));
    }
}
