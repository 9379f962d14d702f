//! Persisted queue configuration (`<data_dir>/config.json`).

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::info;

use queuectl_core::{QueueConfig, QueueError};

use crate::fsutil::{read_if_exists, write_json_atomic};

#[derive(Debug, thiserror::Error)]
pub enum ConfigStoreError {
    #[error("config i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config file {} is invalid: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Invalid(#[from] QueueError),
}

/// Loads and updates the configuration document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current configuration. A missing file is created with the defaults;
    /// keys missing from an existing file take their default values.
    pub fn load(&self) -> Result<QueueConfig, ConfigStoreError> {
        let bytes = read_if_exists(&self.path).map_err(|e| self.io_error(e))?;
        match bytes {
            Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => {
                serde_json::from_slice(&bytes).map_err(|source| ConfigStoreError::Parse {
                    path: self.path.clone(),
                    source,
                })
            }
            _ => {
                let config = QueueConfig::default();
                self.save(&config)?;
                info!(path = %self.path.display(), "wrote default configuration");
                Ok(config)
            }
        }
    }

    pub fn save(&self, config: &QueueConfig) -> Result<(), ConfigStoreError> {
        write_json_atomic(&self.path, config).map_err(|e| self.io_error(e))
    }

    pub fn get(&self, key: &str) -> Result<Value, ConfigStoreError> {
        Ok(self.load()?.get(key)?)
    }

    /// Validate and persist one key. Returns the updated configuration.
    pub fn set(&self, key: &str, value: &str) -> Result<QueueConfig, ConfigStoreError> {
        let mut config = self.load()?;
        config.set(key, value)?;
        self.save(&config)?;
        info!(key, value, "configuration updated");
        Ok(config)
    }

    fn io_error(&self, source: std::io::Error) -> ConfigStoreError {
        ConfigStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
