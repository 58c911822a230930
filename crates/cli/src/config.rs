use anyhow::{Context, Result};
use pipewright_core::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_runs_file")]
    pub runs_file: String,
}

fn default_runs_file() -> String {
    "runs.redb".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            runs_file: default_runs_file(),
        }
    }
}

impl CliConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self {
                data_dir: data_dir.clone(),
                engine: EngineConfig::default(),
                storage: StorageConfig::default(),
            }
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    /// Get the run store path
    pub fn runs_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.runs_file)
    }
}
