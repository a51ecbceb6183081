// Configuration - load settings from config.toml
//
// Provides sensible defaults if the config file is missing or has errors.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub renderer: RendererConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "camview".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Renderer capacities and texture extent
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Backend name; only "vulkan" is implemented.
    pub backend: String,
    pub max_vertices: usize,
    pub max_elements: usize,
    pub texture_width: u32,
    pub texture_height: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: "vulkan".to_string(),
            max_vertices: 4096,
            max_elements: 6144,
            texture_width: 640,
            texture_height: 480,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {}. Using defaults.", e);
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

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let config: Config = toml::from_str("[window]\nwidth = 800\n").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.renderer.backend, "vulkan");
        assert_eq!(config.renderer.max_vertices, 4096);
    }

    #[test]
    fn renderer_capacities_parse() {
        let toml = "[renderer]\nmax_vertices = 12\nmax_elements = 12\n";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.renderer.max_vertices, 12);
        assert_eq!(config.renderer.max_elements, 12);
    }
}
