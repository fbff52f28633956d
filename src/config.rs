//! CLI configuration loaded from TOML.

use anyhow::{Context, Result};
use atomkit_media::MuxerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub muxer: MuxerConfig,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./atomkit.toml", "~/.config/atomkit/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn validate_config(config: &Config) -> Result<()> {
    let muxer = &config.muxer;
    if muxer.timescale == 0 {
        anyhow::bail!("muxer.timescale cannot be 0");
    }
    if muxer.movie_timescale == 0 {
        anyhow::bail!("muxer.movie_timescale cannot be 0");
    }
    if muxer.buffer_size == 0 {
        anyhow::bail!("muxer.buffer_size cannot be 0");
    }
    Ok(())
}
