use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use distill_core::EngineConfig;
use serde::Deserialize;
use tracing::debug;

/// Contents of `config.toml`. Every table and key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub engine: EngineConfig,
    pub api: ApiSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token: None,
            timeout_secs: 30,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub path: Option<PathBuf>,
}

impl FileConfig {
    /// Reads `explicit` when given, otherwise `config.toml` in the platform
    /// config directory if it exists.
    pub fn load(explicit: Option<&Path>, dirs: &ProjectDirs) -> Result<Self> {
        let (path, required) = match explicit {
            Some(path) => (path.to_path_buf(), true),
            None => (dirs.config_dir().join("config.toml"), false),
        };
        if !required && !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let config: FileConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        config
            .engine
            .validate()
            .with_context(|| format!("invalid [engine] settings in {:?}", path))?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }
}
