use std::fs;
use std::path::{Path, PathBuf};

use iwa_core::UpdateManagerConfig;
use iwa_core::install::ExternalCommand;
use iwa_core::models::CoreError;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "iwa-updater.json";

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("failed to read config '{}': {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config '{}': {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Core(#[from] CoreError),

    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

/// On-disk configuration. Manager settings sit at the top level next to the
/// storage and tool settings and may be omitted; `installer` and `verifier`
/// are required.
#[derive(Debug, Deserialize)]
pub struct CliConfig {
    pub database_path: PathBuf,
    pub staging_dir: PathBuf,
    pub installer: ExternalCommand,
    pub verifier: ExternalCommand,
    #[serde(flatten)]
    pub manager: UpdateManagerConfig,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self, CliError> {
        let raw = fs::read(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &[u8], path: &Path) -> Result<Self, CliError> {
        let config: Self = serde_json::from_slice(raw).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        config.manager.validate()?;
        Ok(config)
    }
}
