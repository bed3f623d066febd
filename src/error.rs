//! Error types for Navo
//!
//! All modules use `NavoResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Navo operations
pub type NavoResult<T> = Result<T, NavoError>;

/// All errors that can occur in Navo
#[derive(Error, Debug)]
pub enum NavoError {
    // Configuration errors
    #[error("No configuration file '{file_name}' found in {start} or any ancestor directory")]
    ConfigNotFound { file_name: String, start: PathBuf },

    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("No suites match '{0}'")]
    NoSuitesMatched(String),

    #[error("Pattern '{pattern}' matched more than one suite: {matches}")]
    AmbiguousSuite { pattern: String, matches: String },

    #[error("Invalid suite pattern: {0}")]
    Regex(#[from] regex::Error),

    // Runtime environment errors
    #[error("Container runtime '{0}' not found on PATH")]
    RuntimeNotFound(String),

    // Container errors
    #[error("Container failed to start: {0}")]
    ContainerStart(String),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container command failed: {command}, exit code: {code}")]
    ContainerCommand { command: String, code: i32 },

    #[error("Image build failed for {dockerfile}: {reason}")]
    ImageBuild { dockerfile: PathBuf, reason: String },

    // Dependency errors
    #[error("Dependency resolution failed: {0}")]
    DependencyResolution(String),

    // State errors
    #[error("State file {path} is corrupt: {reason}")]
    StateCorrupt { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command execution error: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    #[error("{failed} of {total} suite(s) failed")]
    SuitesFailed { failed: usize, total: usize },

    #[error("Interrupted")]
    Interrupted,

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl NavoError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => {
                Some("Create a .navo.toml at the root of your cookbook repository")
            }
            Self::RuntimeNotFound(_) => {
                Some("Install Docker or Podman, or set docker.program in .navo.toml")
            }
            Self::StateCorrupt { .. } => Some("Delete the .navo directory to start from a clean slate"),
            Self::NoSuitesMatched(_) => Some("Run: navo list"),
            Self::SuitesFailed { .. } => Some("Each suite's log is at .navo/suites/<name>/log.log"),
            _ => None,
        }
    }
}
