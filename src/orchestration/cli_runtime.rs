//! Docker/Podman CLI container runtime
//!
//! Implements the ContainerRuntime trait by shelling out to the `docker` (or
//! drop-in compatible `podman`) command line client.

use crate::error::{NavoError, NavoResult};
use crate::orchestration::container::{ContainerSpec, ExecOutput, OutputSink};
use crate::orchestration::runtime::ContainerRuntime;
use crate::orchestration::{build_error_output, stream_child_output};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Container runtime driving a docker-compatible CLI
pub struct CliRuntime {
    program: String,
}

impl CliRuntime {
    /// Create a runtime using the given client binary (e.g. "docker", "podman")
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn describe(&self, args: &[&str]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    /// Execute a client command and return the output
    async fn run(&self, args: &[&str]) -> NavoResult<std::process::Output> {
        debug!("Executing: {} {:?}", self.program, args);

        Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(args, e))
    }

    /// Execute a client command, failing on non-zero exit
    async fn run_checked(&self, args: &[&str]) -> NavoResult<String> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NavoError::command_exec(self.describe(args), stderr))
        }
    }

    fn spawn_error(&self, args: &[&str], e: std::io::Error) -> NavoError {
        if e.kind() == std::io::ErrorKind::NotFound {
            NavoError::RuntimeNotFound(self.program.clone())
        } else {
            NavoError::command_failed(self.describe(args), e)
        }
    }

    /// Inspect a single field of a container, None if it does not exist.
    /// Any other failure (daemon down, permissions) is an error.
    async fn inspect_container(&self, container_id: &str, format: &str) -> NavoResult<Option<String>> {
        let output = self
            .run(&["container", "inspect", "--format", format, container_id])
            .await?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing(&stderr) {
            Ok(None)
        } else {
            Err(NavoError::command_exec(
                self.describe(&["container", "inspect", container_id]),
                stderr,
            ))
        }
    }
}

fn is_missing(stderr: &str) -> bool {
    let stderr = stderr.to_lowercase();
    stderr.contains("no such container") || stderr.contains("no such object")
}

#[async_trait]
impl ContainerRuntime for CliRuntime {
    async fn ensure_ready(&self) -> NavoResult<()> {
        let output = self.run(&["version"]).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NavoError::command_exec(self.describe(&["version"]), stderr))
        }
    }

    async fn image_exists(&self, reference: &str) -> NavoResult<bool> {
        Ok(self.image_id(reference).await?.is_some())
    }

    async fn image_id(&self, reference: &str) -> NavoResult<Option<String>> {
        let output = self
            .run(&["image", "inspect", "--format", "{{.Id}}", reference])
            .await?;
        if output.status.success() {
            let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            Ok(Some(id).filter(|id| !id.is_empty()))
        } else {
            Ok(None)
        }
    }

    async fn build_image(
        &self,
        context: &Path,
        dockerfile: &Path,
        tag: &str,
        on_output: OutputSink<'_>,
    ) -> NavoResult<String> {
        info!(
            "Building image {} from {} (context {})",
            tag,
            dockerfile.display(),
            context.display()
        );

        let mut child = Command::new(&self.program)
            .arg("build")
            .arg("--file")
            .arg(dockerfile)
            .arg("--tag")
            .arg(tag)
            .arg(context)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(&["build"], e))?;

        let (stdout, stderr) = stream_child_output(&mut child, on_output).await;
        let status = child
            .wait()
            .await
            .map_err(|e| NavoError::command_failed(self.describe(&["build"]), e))?;

        if !status.success() {
            return Err(NavoError::ImageBuild {
                dockerfile: dockerfile.to_path_buf(),
                reason: build_error_output(&stdout, &stderr),
            });
        }

        self.image_id(tag)
            .await?
            .ok_or_else(|| NavoError::ImageBuild {
                dockerfile: dockerfile.to_path_buf(),
                reason: format!("build succeeded but tag {} does not resolve", tag),
            })
    }

    async fn tag_image(&self, image_id: &str, tag: &str) -> NavoResult<()> {
        self.run_checked(&["tag", image_id, tag]).await.map(|_| ())
    }

    async fn remove_image(&self, reference: &str) -> NavoResult<()> {
        self.run_checked(&["rmi", reference]).await.map(|_| ())
    }

    async fn container_exists(&self, container_id: &str) -> NavoResult<bool> {
        Ok(self
            .inspect_container(container_id, "{{.Id}}")
            .await?
            .is_some())
    }

    async fn is_running(&self, container_id: &str) -> NavoResult<bool> {
        Ok(self
            .inspect_container(container_id, "{{.State.Running}}")
            .await?
            .is_some_and(|running| running == "true"))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> NavoResult<String> {
        let mut args = vec![
            "create".to_string(),
            "--interactive".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--hostname".to_string(),
            spec.hostname.clone(),
        ];

        if spec.privileged {
            args.push("--privileged".to_string());
        }

        for v in spec.binds.iter().chain(&spec.volumes) {
            args.push("--volume".to_string());
            args.push(v.clone());
        }

        let mut env: Vec<_> = spec.env.iter().collect();
        env.sort();
        for (k, v) in env {
            args.push("--env".to_string());
            args.push(format!("{}={}", k, v));
        }

        args.push(spec.image.clone());

        debug!("Creating container: {} {:?}", self.program, args);

        let args_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args_refs).await?;

        if output.status.success() {
            let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
            info!(
                "Container created: {}",
                &container_id[..12.min(container_id.len())]
            );
            Ok(container_id)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(NavoError::ContainerStart(stderr.to_string()))
        }
    }

    async fn start(&self, container_id: &str) -> NavoResult<()> {
        debug!("Starting container: {}", container_id);

        let output = self.run(&["start", container_id]).await?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                Err(NavoError::ContainerNotFound(container_id.to_string()))
            } else {
                Err(NavoError::ContainerStart(stderr.to_string()))
            }
        }
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> NavoResult<()> {
        debug!("Stopping container: {}", container_id);

        let secs = timeout.as_secs().to_string();
        self.run_checked(&["stop", "--time", &secs, container_id])
            .await
            .map(|_| ())
    }

    async fn wait(&self, container_id: &str, timeout: Duration) -> NavoResult<()> {
        debug!("Waiting up to {:?} for container {}", timeout, container_id);

        match tokio::time::timeout(timeout, self.run_checked(&["wait", container_id])).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(NavoError::command_exec(
                self.describe(&["wait", container_id]),
                format!("timed out after {}s", timeout.as_secs()),
            )),
        }
    }

    async fn remove(&self, container_id: &str) -> NavoResult<()> {
        debug!("Removing container: {}", container_id);

        let output = self.run(&["rm", "--force", "--volumes", container_id]).await?;

        if output.status.success() {
            Ok(())
        } else {
            // Ignore error if container doesn't exist
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing(&stderr) {
                Ok(())
            } else {
                Err(NavoError::command_exec(self.describe(&["rm"]), stderr))
            }
        }
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &[String],
        stdin: Option<&[u8]>,
        on_output: OutputSink<'_>,
    ) -> NavoResult<ExecOutput> {
        debug!("Executing in {}: {:?}", container_id, command);

        let mut cmd = Command::new(&self.program);
        cmd.arg("exec");
        if stdin.is_some() {
            cmd.arg("--interactive");
        }
        cmd.arg(container_id)
            .args(command)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(&["exec"], e))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .map_err(|e| NavoError::io("writing command stdin", e))?;
            // Dropping the pipe closes stdin so the command sees EOF
            drop(pipe);
        }

        let (stdout, stderr) = stream_child_output(&mut child, on_output).await;
        let status = child
            .wait()
            .await
            .map_err(|e| NavoError::command_failed(self.describe(&["exec"]), e))?;

        let exit_code = status.code().unwrap_or(-1);
        if exit_code != 0 && is_missing(&stderr) {
            return Err(NavoError::ContainerNotFound(container_id.to_string()));
        }

        Ok(ExecOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn copy_to(&self, container_id: &str, from: &Path, to: &str) -> NavoResult<()> {
        debug!(
            "Copying {} on host to {} in container {}",
            from.display(),
            to,
            container_id
        );

        let from = from.to_string_lossy();
        let destination = format!("{}:{}", container_id, to);
        self.run_checked(&["cp", &from, &destination])
            .await
            .map(|_| ())
    }

    async fn exec_interactive(
        &self,
        container_id: &str,
        command: &[String],
        detach_keys: &str,
    ) -> NavoResult<i32> {
        debug!("Executing interactively in {}: {:?}", container_id, command);

        let status = Command::new(&self.program)
            .arg("exec")
            .arg(format!("--detach-keys={}", detach_keys))
            .arg("--interactive")
            .arg("--tty")
            .arg(container_id)
            .args(command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| self.spawn_error(&["exec"], e))?;

        Ok(status.code().unwrap_or(-1))
    }

    fn runtime_name(&self) -> &'static str {
        if self.program.ends_with("podman") {
            "Podman"
        } else {
            "Docker"
        }
    }
}
