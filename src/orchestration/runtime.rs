//! Container runtime abstraction
//!
//! Suites only ever talk to the container engine through this trait, so the
//! lifecycle logic can run against Docker, Podman, or an in-memory fake.

use crate::error::NavoResult;
use crate::orchestration::container::{ContainerSpec, ExecOutput, OutputSink};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Abstract container engine interface
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Ensure the engine is installed and reachable
    async fn ensure_ready(&self) -> NavoResult<()>;

    /// Whether an image with this id or tag exists
    async fn image_exists(&self, reference: &str) -> NavoResult<bool>;

    /// Resolve an image reference (tag or id) to its id
    async fn image_id(&self, reference: &str) -> NavoResult<Option<String>>;

    /// Build an image from `dockerfile` using `context` as the build directory,
    /// tagging it with `tag`. Returns the image id.
    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &str,
        on_output: OutputSink<'_>,
    ) -> NavoResult<String>;

    /// Add a tag to an existing image
    async fn tag_image(&self, image_id: &str, tag: &str) -> NavoResult<()>;

    /// Remove an image reference (untagging it if other tags remain)
    async fn remove_image(&self, reference: &str) -> NavoResult<()>;

    /// Whether a container with this id still exists
    async fn container_exists(&self, container_id: &str) -> NavoResult<bool>;

    /// Whether a container is currently running
    async fn is_running(&self, container_id: &str) -> NavoResult<bool>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerSpec) -> NavoResult<String>;

    /// Start a created container
    async fn start(&self, container_id: &str) -> NavoResult<()>;

    /// Stop a container, killing it after `timeout`
    async fn stop(&self, container_id: &str, timeout: Duration) -> NavoResult<()>;

    /// Wait up to `timeout` for a container to exit on its own
    async fn wait(&self, container_id: &str, timeout: Duration) -> NavoResult<()>;

    /// Forcibly remove a container and its anonymous volumes
    async fn remove(&self, container_id: &str) -> NavoResult<()>;

    /// Run a command inside a container, streaming output to `on_output`
    async fn exec(
        &self,
        container_id: &str,
        command: &[String],
        stdin: Option<&[u8]>,
        on_output: OutputSink<'_>,
    ) -> NavoResult<ExecOutput>;

    /// Copy a host file or directory into a container
    async fn copy_to(&self, container_id: &str, from: &Path, to: &str) -> NavoResult<()>;

    /// Run a command interactively with the terminal attached
    async fn exec_interactive(
        &self,
        container_id: &str,
        command: &[String],
        detach_keys: &str,
    ) -> NavoResult<i32>;

    /// Get the human-readable runtime name for display
    fn runtime_name(&self) -> &'static str;
}
