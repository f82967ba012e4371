//! Driver configuration management

use crate::input::InputBackend;
use crate::usb::filter::DeviceFilter;
use crate::usb::manager::{DEFAULT_DEVICE_NAME, ManagerConfig};
use crate::usb::worker::WorkerConfig;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System-wide configuration file
const SYSTEM_CONFIG_PATH: &str = "/etc/xppen-tablet/driver.toml";

/// Where the active configuration came from
///
/// Loading runs before logging is set up, so the caller reports this once
/// the subscriber is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file found
    Defaults,
    /// A file was found but could not be used
    Fallback { path: PathBuf, error: String },
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
            ConfigSource::Fallback { path, .. } => {
                write!(f, "built-in defaults ({} unusable)", path.display())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverConfig {
    pub driver: DriverSettings,
    pub usb: UsbSettings,
    #[serde(default)]
    pub input: InputSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSettings {
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Devices to bind, as "0xVID:0xPID" (`*` for either side)
    pub filters: Vec<String>,
    /// Interrupt read timeout in milliseconds
    #[serde(default = "UsbSettings::default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

impl UsbSettings {
    fn default_poll_timeout_ms() -> u64 {
        50
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSettings {
    /// Name of the virtual input device
    #[serde(default = "InputSettings::default_device_name")]
    pub device_name: String,
    /// Start streaming reports as soon as a tablet is attached
    #[serde(default = "InputSettings::default_open_on_attach")]
    pub open_on_attach: bool,
    #[serde(default)]
    pub backend: InputBackend,
}

impl InputSettings {
    fn default_device_name() -> String {
        DEFAULT_DEVICE_NAME.to_string()
    }

    fn default_open_on_attach() -> bool {
        true
    }
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            device_name: Self::default_device_name(),
            open_on_attach: Self::default_open_on_attach(),
            backend: InputBackend::default(),
        }
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver: DriverSettings {
                log_level: "info".to_string(),
            },
            usb: UsbSettings {
                filters: vec![
                    DeviceFilter::exact(protocol::XPPEN_VENDOR_ID, protocol::G540_PRODUCT_ID)
                        .to_string(),
                ],
                poll_timeout_ms: UsbSettings::default_poll_timeout_ms(),
            },
            input: InputSettings::default(),
        }
    }
}

impl DriverConfig {
    /// Load configuration from the specified path
    ///
    /// Without a path the standard locations are searched in order.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_file(&Self::search_paths())
                .ok_or_else(|| anyhow!("No configuration file found"))?,
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Standard locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        vec![Self::default_path(), PathBuf::from(SYSTEM_CONFIG_PATH)]
    }

    fn find_file(candidates: &[PathBuf]) -> Option<PathBuf> {
        candidates.iter().find(|p| p.exists()).cloned()
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: DriverConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> (Self, ConfigSource) {
        Self::load_first(&Self::search_paths())
    }

    /// First existing file among `candidates`, or defaults
    ///
    /// An existing but unreadable or invalid file also yields defaults; the
    /// reason is kept in [`ConfigSource::Fallback`].
    pub fn load_first(candidates: &[PathBuf]) -> (Self, ConfigSource) {
        let Some(path) = Self::find_file(candidates) else {
            return (Self::default(), ConfigSource::Defaults);
        };

        match Self::load(Some(path.clone())) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(e) => (
                Self::default(),
                ConfigSource::Fallback {
                    path,
                    error: format!("{:#}", e),
                },
            ),
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("xppen-tablet").join("driver.toml")
        } else {
            PathBuf::from(".config/xppen-tablet/driver.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.driver.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.driver.log_level,
                valid_levels.join(", ")
            ));
        }

        self.device_filters()?;

        if self.usb.poll_timeout_ms == 0 {
            return Err(anyhow!("usb.poll_timeout_ms must be greater than 0"));
        }

        if self.input.device_name.trim().is_empty() {
            return Err(anyhow!("input.device_name must not be empty"));
        }

        Ok(())
    }

    /// Parsed `usb.filters`
    pub fn device_filters(&self) -> Result<Vec<DeviceFilter>> {
        self.usb
            .filters
            .iter()
            .map(|filter| filter.parse::<DeviceFilter>().map_err(anyhow::Error::from))
            .collect()
    }

    /// Settings for the USB worker thread
    pub fn worker_config(&self) -> Result<WorkerConfig> {
        Ok(WorkerConfig {
            filters: self.device_filters()?,
            poll_timeout: Duration::from_millis(self.usb.poll_timeout_ms),
            manager: ManagerConfig {
                device_name: self.input.device_name.clone(),
                open_on_attach: self.input.open_on_attach,
            },
        })
    }
}

/// Load a config file, expanding `~` in the path
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}
