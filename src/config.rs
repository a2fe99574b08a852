// =============================================================================
// CONFIGURATION - Load overlay settings from overlay.toml
// =============================================================================
//
// This module handles loading and parsing configuration from overlay.toml
// (or the file named by $VK_OVERLAY_CONFIG). Provides sensible defaults if the
// config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that points at an alternative config file
pub const CONFIG_ENV: &str = "VK_OVERLAY_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "overlay.toml";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub texture: TextureConfig,
    pub shaders: ShaderConfig,
    pub viewport: ViewportConfig,
    pub debug: DebugConfig,
}

/// Raw RGBA8 texture drawn by the overlay
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cthead.bin"),
            width: 256,
            height: 256,
        }
    }
}

impl TextureConfig {
    /// Byte length the texture file must have (4 bytes per pixel)
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Pre-baked SPIR-V overrides. `None` uses the words embedded at build time.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: Option<PathBuf>,
    pub fragment: Option<PathBuf>,
}

/// Fixed region the overlay quad is drawn into
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 720,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: String,
    /// Per-frame hooks log once every `log_every` calls
    pub log_every: u32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_every: 60,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        Self::load_from_path(&path).unwrap_or_else(|e| {
            log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get log level as a `log` filter
    pub fn log_level_filter(&self) -> log::LevelFilter {
        match self.debug.log_level.to_lowercase().as_str() {
            "off" => log::LevelFilter::Off,
            "error" => log::LevelFilter::Error,
            "warn" => log::LevelFilter::Warn,
            "info" => log::LevelFilter::Info,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => {
                log::warn!(
                    "Unknown log level '{}', defaulting to INFO",
                    self.debug.log_level
                );
                log::LevelFilter::Info
            }
        }
    }
}
