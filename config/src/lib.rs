//! Configuration for claimgrid.
//!
//! ```toml
//! [grid]
//! size = 100
//! limit = 10000
//!
//! [storage]
//! backend = "sqlite"
//! path = "${HOME}/.local/share/claimgrid/grid.db"
//! busy_timeout_ms = 5000
//!
//! [batch]
//! max_batch = 10000
//! max_identifier_len = 64
//!
//! [mask]
//! threshold = 128
//! ```
//!
//! Every section is optional; a missing config file yields the defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Environment variable that overrides the config file location.
pub const CONFIG_ENV_VAR: &str = "CLAIMGRID_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => Some(path),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClaimGridConfig {
    pub grid: GridConfig,
    pub storage: StorageConfig,
    pub batch: BatchConfig,
    pub mask: MaskConfig,
}

/// Grid geometry and the global claim cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Side of the square grid (`GRID_SIZE`).
    pub size: u32,
    /// Maximum number of claims that may ever exist (`LIMIT`).
    pub limit: u64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            size: 100,
            limit: 10_000,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size == 0 {
            return Err(ConfigError::Invalid("grid.size must be at least 1"));
        }
        if self.limit == 0 {
            return Err(ConfigError::Invalid("grid.limit must be at least 1"));
        }
        Ok(())
    }

    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.size as usize * self.size as usize
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database path. `${VAR}` and a leading `~` are expanded.
    pub path: Option<String>,
    /// Upper bound on how long one candidate's transaction waits for the database.
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Resolve the database path, falling back to the platform data directory.
    #[must_use]
    pub fn resolved_path(&self) -> Option<PathBuf> {
        match &self.path {
            Some(raw) => Some(expand_home(&expand_env_vars(raw))),
            None => dirs::data_dir().map(|dir| dir.join("claimgrid").join("grid.db")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_batch: usize,
    pub max_identifier_len: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch: 10_000,
            max_identifier_len: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Pixels with luma strictly below this value are masked.
    pub threshold: u8,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self { threshold: 128 }
    }
}

impl ClaimGridConfig {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        let config: Self = match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                return Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };
        config.grid.validate()?;
        Ok(config)
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(explicit) = env::var(CONFIG_ENV_VAR)
        && !explicit.trim().is_empty()
    {
        return Some(PathBuf::from(explicit));
    }
    dirs::config_dir().map(|dir| dir.join("claimgrid").join("claimgrid.toml"))
}

/// Replace `${VAR}` occurrences with the variable's value (empty if unset).
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}
