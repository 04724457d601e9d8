//! Workspace configuration.
//!
//! Read from `<workspace>/.sextant/config.yaml` when present:
//!
//! ```yaml
//! cache_dir: .sextant/cache
//! persist_cache: true
//! fingerprint: metadata
//! workers: 10
//! deadline_ms: 30000
//! chain:
//!   max_depth: 10
//!   max_paths: 100
//! impact:
//!   max_depth: 5
//! ```
//!
//! Every key is optional.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::fingerprint::FingerprintMode;

/// Name of the per-workspace directory.
pub const SEXTANT_DIR_NAME: &str = ".sextant";

/// Name of the configuration file inside [`SEXTANT_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Hard ceiling for any traversal depth.
pub const MAX_DEPTH_CEILING: usize = 20;

/// Largest accepted worker-pool width.
pub const MAX_WORKERS: usize = 64;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// On-disk cache area; relative paths are resolved against the workspace.
    pub cache_dir: PathBuf,
    /// Keep cache entries across runs.
    pub persist_cache: bool,
    /// How file fingerprints are derived.
    pub fingerprint: FingerprintMode,
    /// Worker-pool width.
    pub workers: usize,
    /// Overall batch deadline in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Maximum number of files analyzed per run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_files: Option<usize>,
    /// Defaults for `find_chain`.
    pub chain: ChainDefaults,
    /// Defaults for `impact`.
    pub impact: ImpactDefaults,
}

/// Defaults applied when a chain request omits a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainDefaults {
    /// Maximum path length in edges.
    pub max_depth: usize,
    /// Maximum number of paths returned.
    pub max_paths: usize,
}

impl Default for ChainDefaults {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_paths: 100,
        }
    }
}

/// Defaults applied when an impact request omits a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImpactDefaults {
    /// Maximum BFS depth.
    pub max_depth: usize,
}

impl Default for ImpactDefaults {
    fn default() -> Self {
        Self { max_depth: 5 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: Path::new(SEXTANT_DIR_NAME).join("cache"),
            persist_cache: true,
            fingerprint: FingerprintMode::default(),
            workers: 10,
            deadline_ms: None,
            max_files: None,
            chain: ChainDefaults::default(),
            impact: ImpactDefaults::default(),
        }
    }
}

impl Config {
    /// Parse a YAML document and validate it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the YAML is malformed or a value is out of range.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or `Error::Config`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Load `<workspace>/.sextant/config.yaml`, or the defaults if it does not exist.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`] for an existing file.
    pub fn load_or_default(workspace: &Path) -> Result<Self> {
        let path = workspace.join(SEXTANT_DIR_NAME).join(CONFIG_FILE_NAME);
        match fs::metadata(&path) {
            Ok(_) => {
                debug!(path = %path.display(), "Loading configuration");
                Self::load(&path)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the configuration as YAML.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if serialization fails, or an I/O error.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)
            .map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Cache directory resolved against `workspace`.
    #[must_use]
    pub fn cache_dir_in(&self, workspace: &Path) -> PathBuf {
        if self.cache_dir.is_absolute() {
            self.cache_dir.clone()
        } else {
            workspace.join(&self.cache_dir)
        }
    }

    /// Check every value is in range.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(Error::Config(format!(
                "workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.max_files == Some(0) {
            return Err(Error::Config("max_files must be at least 1".to_string()));
        }
        check_depth("chain.max_depth", self.chain.max_depth)?;
        check_depth("impact.max_depth", self.impact.max_depth)?;
        if self.chain.max_paths == 0 {
            return Err(Error::Config(
                "chain.max_paths must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_depth(key: &str, depth: usize) -> Result<()> {
    if (1..=MAX_DEPTH_CEILING).contains(&depth) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{key} must be between 1 and {MAX_DEPTH_CEILING}, got {depth}"
        )))
    }
}
