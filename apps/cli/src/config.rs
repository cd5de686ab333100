//! CLI configuration.
//!
//! Reads TOML at `~/.config/upqueue/upqueue.toml` unless `--config` names
//! another file. Uploader settings live under an `[uploader]` table.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use upqueue_engine::UploaderConfig;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub uploader: UploaderConfig,

    /// Attempts per file when requeueing on error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            uploader: UploaderConfig::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// A missing default file yields defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let (file_path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (config_path(), false),
        };

        if !file_path.exists() {
            if explicit {
                anyhow::bail!("config file not found: {}", file_path.display());
            }
            tracing::debug!(path = %file_path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&file_path)
            .with_context(|| format!("reading {}", file_path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("parsing {}", file_path.display()))?;
        tracing::debug!(path = %file_path.display(), "loaded config");
        Ok(config)
    }
}

/// Default config location: `$HOME/.config/upqueue/upqueue.toml`.
pub fn config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("upqueue")
        .join("upqueue.toml")
}
