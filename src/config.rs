//! TOML configuration.
//!
//! ```toml
//! [state]
//! path = "/var/lib/devauth/state.json"
//!
//! [auth]
//! store_id_env = "UBUNTU_STORE_ID"
//! ```
//!
//! Every field is optional; a missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted for the store id override by default.
pub const DEFAULT_STORE_ID_ENV: &str = "UBUNTU_STORE_ID";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub state: StateConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// State file location. Defaults to the platform data directory.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable that forces the store id when set and non-empty.
    pub store_id_env: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            store_id_env: DEFAULT_STORE_ID_ENV.to_string(),
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("io", "devauth", "devauth")
}

impl Config {
    /// Load configuration from an explicit file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Load `<config dir>/config.toml` if it exists, defaults otherwise.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

impl StateConfig {
    /// Configured state path, or `<data dir>/state.json`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().join("state.json"))
            .context("Cannot determine a data directory; set state.path in the config")
    }
}
