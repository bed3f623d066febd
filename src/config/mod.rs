//! Configuration management for Navo

pub mod schema;

pub use schema::{ChefConfig, Config, DestroyPolicy, DockerConfig, SuiteConfig};

use crate::error::{NavoError, NavoResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Name of the configuration file
pub const CONFIG_FILE_NAME: &str = ".navo.toml";

/// Directory under the repository root holding persisted state and logs
pub const STATE_DIR_NAME: &str = ".navo";

/// A loaded configuration together with the repository it applies to
#[derive(Debug, Clone)]
pub struct Project {
    /// Parsed configuration
    pub config: Config,
    /// Path of the configuration file
    pub config_path: PathBuf,
    /// Repository root (directory containing the configuration file)
    pub repo_root: PathBuf,
}

impl Project {
    /// Directory holding all persisted state for this repository
    pub fn state_dir(&self) -> PathBuf {
        self.repo_root.join(STATE_DIR_NAME)
    }

    /// Path of the global state file
    pub fn global_state_path(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    /// Directory holding one suite's state and log
    pub fn suite_dir(&self, name: &str) -> PathBuf {
        self.state_dir().join("suites").join(name)
    }

    /// Resolve a path from the configuration relative to the repository root
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.repo_root.join(path)
    }
}

/// Configuration manager
pub struct ConfigManager;

impl ConfigManager {
    /// Find the configuration file in `start` or its nearest ancestor
    pub fn find_local_config(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load the configuration applicable to `cwd`
    pub async fn load_applicable(cwd: &Path) -> NavoResult<Project> {
        let path = Self::find_local_config(cwd).ok_or_else(|| NavoError::ConfigNotFound {
            file_name: CONFIG_FILE_NAME.to_string(),
            start: cwd.to_path_buf(),
        })?;
        debug!("Found local config: {}", path.display());
        Self::load_from_file(&path).await
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(path: &Path) -> NavoResult<Project> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| NavoError::io(format!("reading config from {}", path.display()), e))?;

        let config: Config = toml::from_str(&content).map_err(|e| NavoError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config_path = std::path::absolute(path)
            .map_err(|e| NavoError::io(format!("resolving {}", path.display()), e))?;
        let repo_root = config_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| NavoError::ConfigInvalid {
                path: config_path.clone(),
                reason: "configuration file has no parent directory".to_string(),
            })?;

        Ok(Project {
            config,
            config_path,
            repo_root,
        })
    }
}
