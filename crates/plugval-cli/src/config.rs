use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use plugval_process::{RunnerConfig, DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_TIMEOUT};
use serde::{Deserialize, Serialize};

const CONFIG_DIR: &str = "plugval";
const CONFIG_FILE: &str = "plugval.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlugvalConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default)]
    pub kill_on_output_limit: bool,
    /// Validator executable used when no program is given on the command line.
    #[serde(default)]
    pub validator: Option<String>,
    #[serde(default)]
    pub validator_args: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

impl Default for PlugvalConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_output_bytes: default_max_output_bytes(),
            kill_on_output_limit: false,
            validator: None,
            validator_args: Vec::new(),
        }
    }
}

impl PlugvalConfig {
    pub fn default_path() -> Result<PathBuf> {
        let base = dirs::config_dir().context("no configuration directory on this platform")?;
        Ok(base.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Reads `path`. A missing file yields the defaults; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("no config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        serde_json::from_str(&data)
            .with_context(|| format!("{} is not a valid plugval config", path.display()))
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_output_bytes(self.max_output_bytes)
            .with_kill_on_output_limit(self.kill_on_output_limit)
    }
}
