//! Configuration file support for samflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SAMFLASH_*)
//! 3. Local config file (./samflash.toml)
//! 4. Global config file (~/.config/samflash/config.toml)

use directories::ProjectDirs;
use log::{debug, info, warn};
use samflash::{DeviceProfile, builtin_profiles};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG: &str = "samflash.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Flash configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Default device profile name.
    pub device: Option<String>,
    /// Use XMODEM page uploads by default.
    #[serde(default)]
    pub xmodem: bool,
    /// Skip read-back verification by default.
    #[serde(default)]
    pub skip_verify: bool,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    /// Extra device profiles, looked up before the built-in ones.
    #[serde(default, rename = "device")]
    pub devices: Vec<DeviceProfile>,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "samflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    fn merge(&mut self, other: Self) {
        if other.connection.serial.is_some() {
            self.connection.serial = other.connection.serial;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.flash.device.is_some() {
            self.flash.device = other.flash.device;
        }
        if other.flash.xmodem {
            self.flash.xmodem = true;
        }
        if other.flash.skip_verify {
            self.flash.skip_verify = true;
        }
        // Later files shadow earlier profiles of the same name.
        for device in other.devices {
            self.devices.retain(|d| !d.name.eq_ignore_ascii_case(&device.name));
            self.devices.push(device);
        }
    }

    /// Resolve a device name against configured profiles, then built-in ones.
    pub fn find_device(&self, name: &str) -> samflash::Result<DeviceProfile> {
        if let Some(profile) = self
            .devices
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name.trim()))
        {
            profile.validate()?;
            return Ok(profile.clone());
        }
        DeviceProfile::by_name(name)
    }

    /// Configured profiles followed by built-in ones not shadowed by them.
    pub fn all_devices(&self) -> Vec<(DeviceProfile, bool)> {
        let mut devices: Vec<(DeviceProfile, bool)> =
            self.devices.iter().cloned().map(|d| (d, false)).collect();
        for builtin in builtin_profiles() {
            if !devices
                .iter()
                .any(|(d, _)| d.name.eq_ignore_ascii_case(&builtin.name))
            {
                devices.push((builtin, true));
            }
        }
        devices
    }

    /// Remember `serial` as the default port.
    ///
    /// Writes the local `samflash.toml` when it exists, otherwise the global
    /// config file.
    pub fn remember_port(&mut self, serial: &str) -> anyhow::Result<()> {
        let path = remember_port_path(Path::new(LOCAL_CONFIG), Self::global_config_dir());
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        self.save_port_to(&path, serial)
    }

    fn save_port_to(&mut self, path: &Path, serial: &str) -> anyhow::Result<()> {
        // Rewrite only what was on disk, not the merged view.
        let mut on_disk = Self::load_from_file(path).unwrap_or_default();
        on_disk.connection.serial = Some(serial.to_string());
        self.connection.serial = Some(serial.to_string());

        let content = toml::to_string_pretty(&on_disk)?;
        fs::write(path, content)?;
        info!("Saved port {serial} to {}", path.display());

        Ok(())
    }
}

/// File that `remember_port` rewrites.
fn remember_port_path(local: &Path, global_dir: Option<PathBuf>) -> PathBuf {
    match global_dir {
        Some(dir) if !local.exists() => dir.join("config.toml"),
        _ => local.to_path_buf(),
    }
}
