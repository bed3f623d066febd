//! Orchestration module for container runtimes
//!
//! Provides engine-agnostic container management. The shipped backend drives
//! the `docker` CLI, or `podman` as a drop-in replacement.

mod cli_runtime;
pub mod container;
mod runtime;

pub use cli_runtime::CliRuntime;
pub use container::{ContainerSpec, ExecOutput, OutputChunk, OutputSink, StreamKind};
pub use runtime::ContainerRuntime;

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of output lines to include in build error messages.
const BUILD_ERROR_TAIL_LINES: usize = 50;

/// Create the container runtime for a configured client binary
pub fn create_runtime(program: &str) -> Arc<dyn ContainerRuntime> {
    Arc::new(CliRuntime::new(program))
}

/// Extract the useful tail of build output for error diagnostics.
///
/// Combines stdout and stderr, then returns the last `BUILD_ERROR_TAIL_LINES`
/// lines so error messages are actionable without being overwhelming.
pub(crate) fn build_error_output(stdout: &str, stderr: &str) -> String {
    let lines: Vec<&str> = stdout.lines().chain(stderr.lines()).collect();
    let total = lines.len();
    let tail: Vec<&str> = if total > BUILD_ERROR_TAIL_LINES {
        lines[total - BUILD_ERROR_TAIL_LINES..].to_vec()
    } else {
        lines
    };
    tail.join("\n")
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Returns the collected stdout and stderr. This is a standalone async
/// function (not behind `async_trait`) to avoid lifetime issues with the
/// `dyn Fn` callback.
pub(crate) async fn stream_child_output(
    child: &mut tokio::process::Child,
    on_output: OutputSink<'_>,
) -> (String, String) {
    let mut stdout_buf = String::new();
    let mut stderr_buf = String::new();

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return (stdout_buf, stderr_buf);
    };

    let mut stderr_reader = BufReader::new(stderr).lines();
    let mut stdout_reader = BufReader::new(stdout).lines();

    let mut stderr_done = false;
    let mut stdout_done = false;

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = stderr_reader.next_line(), if !stderr_done => {
                match line {
                    Ok(Some(line)) => {
                        stderr_buf.push_str(&line);
                        stderr_buf.push('\n');
                        on_output(OutputChunk::stderr(line));
                    }
                    _ => stderr_done = true,
                }
            }
            line = stdout_reader.next_line(), if !stdout_done => {
                match line {
                    Ok(Some(line)) => {
                        stdout_buf.push_str(&line);
                        stdout_buf.push('\n');
                        on_output(OutputChunk::stdout(line));
                    }
                    _ => stdout_done = true,
                }
            }
        }
    }

    (stdout_buf, stderr_buf)
}
