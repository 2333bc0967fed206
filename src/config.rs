use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Resolved configuration for a watch session.
///
/// Loaded from an optional `llmix.toml` in the watched directory. Every field
/// has a default, so a missing or empty config file is fully usable.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    /// Glob patterns to ignore, in addition to the built-in defaults.
    #[serde(default)]
    pub ignore: Vec<String>,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Where generated artifacts go and how they are named.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Directory (relative to the watch root) holding the group registry
    /// and per-group output directories.
    #[serde(default = "default_output_directory")]
    pub directory: String,

    /// Filename template for generated artifacts. `{name}` is replaced with
    /// the group id and `{timestamp}` with a compact UTC timestamp.
    #[serde(default = "default_file_name_pattern", rename = "fileNamePattern")]
    pub file_name_pattern: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            file_name_pattern: default_file_name_pattern(),
        }
    }
}

fn default_output_directory() -> String {
    ".llmix".to_string()
}

fn default_file_name_pattern() -> String {
    "{name}-{timestamp}.txt".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:3001".to_string()
}

/// Load configuration from a TOML file.
///
/// A missing file is not an error — the defaults describe a complete,
/// working setup. A present-but-broken file is, since silently falling back
/// to defaults would mask the user's mistake.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    if config.output.directory.is_empty() {
        anyhow::bail!("output.directory must not be empty");
    }

    if !config.output.file_name_pattern.contains("{timestamp}") {
        anyhow::bail!("output.fileNamePattern must contain a {{timestamp}} placeholder");
    }

    Ok(config)
}
