//! Configuration schema for Navo
//!
//! Configuration is stored in `.navo.toml` at the root of the cookbook
//! repository.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// When to tear down a suite after `test`
    pub destroy: DestroyPolicy,

    /// Maximum suites run concurrently (defaults to the CPU count)
    pub concurrency: Option<usize>,

    /// Container engine settings
    pub docker: DockerConfig,

    /// Chef settings shared by every suite
    pub chef: ChefConfig,

    /// Suites keyed by name
    pub suites: BTreeMap<String, SuiteConfig>,
}

/// Destroy policy applied at the end of `test`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestroyPolicy {
    /// Destroy only if converge and verify both passed
    #[default]
    Passing,
    /// Always destroy
    Always,
    /// Leave the sandbox up for inspection
    Never,
}

impl DestroyPolicy {
    /// Whether a suite with the given outcome should be destroyed
    pub fn should_destroy(&self, passed: bool) -> bool {
        match self {
            Self::Passing => passed,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

impl fmt::Display for DestroyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passing => write!(f, "passing"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

/// Container engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Client binary (docker or podman)
    pub program: String,

    /// Dockerfile path, relative to the repository root
    pub dockerfile: String,

    /// Repository name used when tagging suite images
    pub repo: String,

    /// Run containers privileged
    pub privileged: bool,

    /// Volume specs applied to every suite (host:container, or a bare
    /// absolute path for an anonymous data volume)
    pub volumes: Vec<String>,

    /// Command run inside the container to stop it gracefully
    pub stop_command: Option<Vec<String>>,

    /// Seconds to wait for a graceful stop
    pub stop_timeout: u64,

    /// Shell started by `login`
    pub shell_command: Vec<String>,

    /// Key sequence detaching from a `login` session
    pub detach_keys: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
            dockerfile: "Dockerfile".to_string(),
            repo: "navo".to_string(),
            privileged: false,
            volumes: vec![],
            stop_command: None,
            stop_timeout: 10,
            shell_command: vec!["/bin/bash".to_string()],
            detach_keys: "ctrl-x,b".to_string(),
        }
    }
}

/// Chef configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChefConfig {
    /// Berksfile path, relative to the repository root
    pub berksfile: String,

    /// Encrypted data bag secret, relative to the repository root
    pub secret: Option<String>,

    /// Chef environment
    pub environment: String,

    /// Node attributes shared by every suite
    pub attributes: toml::Table,
}

impl Default for ChefConfig {
    fn default() -> Self {
        Self {
            berksfile: "Berksfile".to_string(),
            secret: None,
            environment: "_default".to_string(),
            attributes: toml::Table::new(),
        }
    }
}

/// Per-suite configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Chef run list
    pub run_list: Vec<String>,

    /// Node attributes layered over the shared ones
    pub attributes: toml::Table,

    /// Extra volume specs for this suite
    pub volumes: Vec<String>,

    /// Container hostname (defaults to the suite name)
    pub hostname: Option<String>,

    /// Dockerfile for this suite's image (defaults to `docker.dockerfile`)
    pub dockerfile: Option<String>,
}
