use crate::infrastructure::bluetooth::error::TrackerResult;
use crate::infrastructure::bluetooth::protocol::{
    parse_uuid, COMMAND_CHAR_UUID, SERVICE_UUID, STATE_CHAR_UUID, TRACKING_SPEED_CHAR_UUID,
};
use crate::infrastructure::bluetooth::service::{TrackerConfig, DEFAULT_SCAN_TIMEOUT_SECS};
use crate::infrastructure::bluetooth::session::TrackerIds;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logging configuration; missing fields take their defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String, // "trace", "debug", "info", "warn", "error"
    /// Level for raw bytes exchanged with the mount, off when unset
    pub wire_level: Option<String>,
    pub file_logging_enabled: bool,
    pub console_logging_enabled: bool,
    pub log_dir: String,
    pub file_name_prefix: String,
    pub show_file_line: bool,
    pub show_thread_ids: bool,
    pub show_target: bool,
    pub ansi_colors: bool,
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            wire_level: None,
            file_logging_enabled: true,
            console_logging_enabled: true,
            log_dir: "logs".to_string(),
            file_name_prefix: "star_tracker".to_string(),
            show_file_line: false,
            show_thread_ids: false,
            show_target: true,
            ansi_colors: true,
            rotation: "daily".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Mount identifiers and connection behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSettings {
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub command_char_uuid: String,
    #[serde(default = "default_state_uuid")]
    pub state_char_uuid: String,
    #[serde(default = "default_tracking_speed_uuid")]
    pub tracking_speed_char_uuid: String,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub require_speed_sync: bool,
    #[serde(default = "default_true")]
    pub auto_scan_on_power_on: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            service_uuid: default_service_uuid(),
            command_char_uuid: default_command_uuid(),
            state_char_uuid: default_state_uuid(),
            tracking_speed_char_uuid: default_tracking_speed_uuid(),
            scan_timeout_secs: default_scan_timeout_secs(),
            require_speed_sync: default_true(),
            auto_scan_on_power_on: default_true(),
        }
    }
}

impl TrackerSettings {
    /// Validate the identifiers and build the service configuration
    pub fn to_config(&self) -> TrackerResult<TrackerConfig> {
        Ok(TrackerConfig {
            ids: TrackerIds {
                service: parse_uuid(&self.service_uuid)?,
                command: parse_uuid(&self.command_char_uuid)?,
                state: parse_uuid(&self.state_char_uuid)?,
                tracking_speed: parse_uuid(&self.tracking_speed_char_uuid)?,
            },
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            require_speed_sync: self.require_speed_sync,
            auto_scan_on_power_on: self.auto_scan_on_power_on,
        })
    }
}

fn default_service_uuid() -> String {
    SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    COMMAND_CHAR_UUID.to_string()
}
fn default_state_uuid() -> String {
    STATE_CHAR_UUID.to_string()
}
fn default_tracking_speed_uuid() -> String {
    TRACKING_SPEED_CHAR_UUID.to_string()
}
fn default_scan_timeout_secs() -> u64 {
    DEFAULT_SCAN_TIMEOUT_SECS
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub tracker: TrackerSettings,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Use an explicit settings file; a missing or broken file yields defaults
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("StarTracker");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}
