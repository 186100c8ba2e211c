use crate::buffer::DEFAULT_MAX_OUTPUT_BYTES;
use crate::command::{Interpreters, Platform};
use crate::error::ConfigError;
use crate::session::LaunchConfig;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scripts_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub clock_interval_ms: u64,
    pub kill_grace_ms: u64,
    pub max_output_bytes: usize,
    pub interpreters: Interpreters,
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("./scripts"),
            poll_interval_ms: 2000,
            clock_interval_ms: 1000,
            kill_grace_ms: 1500,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            interpreters: Interpreters::default(),
            log_dir: None,
        }
    }
}

impl Config {
    /// Missing file means defaults; a file that does not parse is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock_interval_ms.max(100))
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            platform: Platform::host(),
            interpreters: self.interpreters.clone(),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = env::var("OCTO_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    config_dir().join("octo/config.toml")
}

fn config_dir() -> PathBuf {
    if let Ok(path) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(path);
    }
    env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
}
