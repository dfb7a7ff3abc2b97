//! Updater configuration, stored as JSON next to the database
//! (`vulnsync.json`) or at an explicit path.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Largest batch a store transaction is expected to accept
pub const MAX_BATCH_SIZE: usize = 500;

/// File name looked up next to the database when no path is given
pub const CONFIG_FILE_NAME: &str = "vulnsync.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write config {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How CVE files are named: `<prefix>-<year>-<number>.<extension>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNaming {
    pub prefix: String,
    pub extension: String,
}

impl Default for FileNaming {
    fn default() -> Self {
        Self {
            prefix: "CVE".to_string(),
            extension: "json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Substrings of reference URLs or descriptions that make a public CVE
    /// need an issue
    pub patterns: Vec<String>,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            patterns: ["golang.org", "go.dev", "pkg.go.dev", "github.com/golang"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Files per store transaction
    pub batch_size: usize,
    pub naming: FileNaming,
    pub triage: TriageConfig,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            naming: FileNaming::default(),
            triage: TriageConfig::default(),
        }
    }
}

impl UpdateConfig {
    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: UpdateConfig = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Config for a database: `vulnsync.json` in the database's directory
    pub fn load_for_db(db_path: &Path) -> Result<Self, ConfigError> {
        let dir = db_path.parent().unwrap_or_else(|| Path::new("."));
        Self::load(&dir.join(CONFIG_FILE_NAME))
    }

    /// Save atomically (write a temp file, then rename)
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        let data = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, data).map_err(write_err)?;
        fs::rename(&tmp_path, path).map_err(write_err)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE, self.batch_size
            )));
        }
        if self.naming.prefix.is_empty() || self.naming.extension.is_empty() {
            return Err(ConfigError::Invalid("naming prefix and extension must be non-empty".into()));
        }
        Ok(())
    }
}
