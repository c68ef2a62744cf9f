//! Configuration loading and parsing

use anyhow::{Context, Result};
use can_stream_decoder::EngineConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Inputs decoded when no --log arguments are given
    #[serde(default)]
    pub input: InputConfig,

    /// Decoding engine settings, handed straight to the registry
    #[serde(default)]
    pub engine: EngineConfig,

    /// Output rendering settings
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Decoded message rendering
    #[serde(default)]
    pub format: OutputFormat,

    /// Print the per-decoder statistics table after each input
    #[serde(default = "default_true")]
    pub stats: bool,

    /// Include the reassembled payload bytes in text output
    #[serde(default)]
    pub show_payload: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            stats: true,
            show_payload: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Text
    }
}

fn default_true() -> bool {
    true
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .engine
        .validate()
        .with_context(|| format!("Invalid engine settings in {:?}", path))?;

    Ok(config)
}
