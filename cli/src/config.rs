// Configuration management for the capmesh CLI
//
// The node configuration is stored as JSON in:
// - macOS: ~/Library/Application Support/capmesh/config.json
// - Linux: ~/.config/capmesh/config.json
// - Windows: %APPDATA%\capmesh\config.json
//
// `--config <path>` replaces that location for a single invocation.

use anyhow::{Context, Result};
use capmesh_core::NodeConfig;
use std::path::{Path, PathBuf};

/// Get the config directory path (cross-platform)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Failed to determine config directory")?
        .join("capmesh");

    std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

    Ok(config_dir)
}

pub fn config_file(override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(config_dir()?.join("config.json")),
    }
}

/// Load the node config, writing the defaults on first use. Values that
/// fail to parse fall back to their defaults.
pub fn load(override_path: Option<&Path>) -> Result<NodeConfig> {
    let path = config_file(override_path)?;

    if !path.exists() {
        let config = NodeConfig::default();
        config
            .save(&path)
            .with_context(|| format!("Failed to write default config to {}", path.display()))?;
        return Ok(config);
    }

    Ok(NodeConfig::load_or_default(&path))
}

pub fn save(config: &NodeConfig, override_path: Option<&Path>) -> Result<()> {
    let path = config_file(override_path)?;
    config
        .save(&path)
        .with_context(|| format!("Failed to write config file {}", path.display()))
}

/// Set a config value
pub fn set(config: &mut NodeConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "max_distance" => {
            config.max_distance = value.parse().context("Invalid distance")?;
        }
        "max_ttl" => {
            config.max_ttl = value.parse().context("Invalid ttl")?;
        }
        "same_ttl" => {
            config.same_ttl = if value.is_empty() {
                None
            } else {
                Some(value.parse().context("Invalid ttl")?)
            };
        }
        "seen_capacity" => {
            config.seen_capacity = value.parse().context("Invalid number")?;
        }
        "taxonomy_file" => {
            config.taxonomy_file = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }
    *config = config.clone().validated();
    Ok(())
}

/// List all config values
pub fn list(config: &NodeConfig) -> Vec<(String, String)> {
    vec![
        ("max_distance".to_string(), config.max_distance.to_string()),
        ("max_ttl".to_string(), config.max_ttl.to_string()),
        (
            "same_ttl".to_string(),
            config
                .same_ttl
                .map(|ttl| ttl.to_string())
                .unwrap_or_else(|| "(unset)".to_string()),
        ),
        ("seen_capacity".to_string(), config.seen_capacity.to_string()),
        (
            "taxonomy_file".to_string(),
            config
                .taxonomy_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(empty taxonomy)".to_string()),
        ),
    ]
}
