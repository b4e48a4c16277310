//! Configuration file support for berlints.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (BERLINTS_*)
//! 3. Local config file (./berlints.toml)
//! 4. Global config file (~/.config/berlints/config.toml)
//!
//! ```toml
//! [device]
//! generation = "berlind"
//!
//! [short]
//! channel_to_channel = 500
//! channel_to_avdd = 500
//! channel_to_gnd = 500
//!
//! [channel_map]
//! sense = [0, 1, 2]
//! drive = [40, 41]
//! ```

use berlin_ts::{ChannelMap, Generation, ShortThresholds};
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "berlints.toml";

/// Target device settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSection {
    /// Controller generation.
    pub generation: Option<Generation>,
}

/// Module bonding tables, unified die index per pin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMapSection {
    /// Die index bonded to RX0, RX1, ...
    #[serde(default)]
    pub sense: Vec<u16>,
    /// Die index bonded to TX0, TX1, ...
    #[serde(default)]
    pub drive: Vec<u16>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device settings.
    #[serde(default)]
    pub device: DeviceSection,
    /// Short-test thresholds in kΩ.
    pub short: Option<ShortThresholds>,
    /// Bonding tables.
    pub channel_map: Option<ChannelMapSection>,
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

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
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
        ProjectDirs::from("", "", "berlints").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.device.generation.is_some() {
            self.device.generation = other.device.generation;
        }
        if other.short.is_some() {
            self.short = other.short;
        }
        if other.channel_map.is_some() {
            self.channel_map = other.channel_map;
        }
    }

    /// Thresholds for short classification.
    pub fn short_thresholds(&self) -> ShortThresholds {
        self.short.unwrap_or_default()
    }

    /// Bonding tables for `generation`; identity when none are configured.
    pub fn channel_map(&self, generation: Generation) -> ChannelMap {
        match &self.channel_map {
            Some(section) if !section.sense.is_empty() || !section.drive.is_empty() => {
                ChannelMap::new(
                    generation.max_sen_num(),
                    section.sense.clone(),
                    section.drive.clone(),
                )
            },
            _ => ChannelMap::identity(generation),
        }
    }
}
