//! Container shared types
//!
//! Data structures passed between suites and container runtimes.

use std::collections::HashMap;

/// Specification for creating a new suite container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image id to create the container from
    pub image: String,
    /// Hostname inside the container
    pub hostname: String,
    /// Bind mounts (host:container[:opts])
    pub binds: Vec<String>,
    /// Anonymous data volumes (container paths)
    pub volumes: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Run privileged
    pub privileged: bool,
}

impl ContainerSpec {
    /// Split volume specs into anonymous data volumes and bind mounts.
    ///
    /// A spec that is an absolute path without any colon is a data volume;
    /// everything else is passed through as a bind mount.
    pub fn add_volume_specs<I, S>(&mut self, specs: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for spec in specs {
            let spec = spec.into();
            if spec.starts_with('/') && !spec.contains(':') {
                self.volumes.push(spec);
            } else {
                self.binds.push(spec);
            }
        }
    }
}

/// Which stream a chunk of command output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

/// A line of output from a command running in a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub line: String,
}

impl OutputChunk {
    pub fn stdout(line: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            line: line.into(),
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            line: line.into(),
        }
    }
}

/// Collected result of running a command in a container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecOutput {
    /// Whether the command exited with status 0
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Callback receiving output as it is produced
pub type OutputSink<'a> = &'a (dyn Fn(OutputChunk) + Send + Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_specs_are_partitioned() {
        let mut spec = ContainerSpec::default();
        spec.add_volume_specs([
            "/var/lib/docker",
            "/host/cache:/cache",
            "named:/data:ro",
            "relative",
        ]);

        assert_eq!(spec.volumes, vec!["/var/lib/docker"]);
        assert_eq!(
            spec.binds,
            vec!["/host/cache:/cache", "named:/data:ro", "relative"]
        );
    }

    #[test]
    fn exec_output_success() {
        let output = ExecOutput {
            exit_code: 0,
            ..Default::default()
        };
        assert!(output.success());
        assert!(!ExecOutput {
            exit_code: 2,
            ..Default::default()
        }
        .success());
    }
}
