//! In-memory collaborators for unit tests

use crate::cache::DependencyResolver;
use crate::error::{NavoError, NavoResult};
use crate::orchestration::{
    ContainerRuntime, ContainerSpec, ExecOutput, OutputChunk, OutputSink,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    pub running: bool,
}

#[derive(Default)]
struct Engine {
    next_id: usize,
    images: HashSet<String>,
    tags: HashMap<String, String>,
    containers: HashMap<String, FakeContainer>,
    builds: usize,
    creates: usize,
    starts: usize,
    stops: usize,
    removes: usize,
    execs: Vec<String>,
    copies: Vec<(PathBuf, String)>,
    exit_codes: Vec<(String, i32)>,
    build_delay: Duration,
    fail_stop: bool,
    failing_copies: Vec<String>,
}

/// Container engine kept entirely in memory
#[derive(Default)]
pub struct FakeRuntime {
    engine: Mutex<Engine>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Engine) -> T) -> T {
        let mut engine = self.engine.lock().unwrap();
        f(&mut engine)
    }

    pub fn build_count(&self) -> usize {
        self.with(|e| e.builds)
    }

    pub fn create_count(&self) -> usize {
        self.with(|e| e.creates)
    }

    pub fn start_count(&self) -> usize {
        self.with(|e| e.starts)
    }

    pub fn stop_count(&self) -> usize {
        self.with(|e| e.stops)
    }

    pub fn remove_count(&self) -> usize {
        self.with(|e| e.removes)
    }

    /// Every command run through `exec`, joined with spaces
    pub fn execs(&self) -> Vec<String> {
        self.with(|e| e.execs.clone())
    }

    pub fn copies(&self) -> Vec<(PathBuf, String)> {
        self.with(|e| e.copies.clone())
    }

    pub fn image_for_tag(&self, tag: &str) -> Option<String> {
        self.with(|e| e.tags.get(tag).cloned())
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.with(|e| e.containers.get(id).cloned())
    }

    pub fn container_count(&self) -> usize {
        self.with(|e| e.containers.len())
    }

    /// Delete an image behind the caller's back
    pub fn forget_image(&self, id: &str) {
        self.with(|e| {
            e.images.remove(id);
            e.tags.retain(|_, image| image != id);
        })
    }

    /// Delete a container behind the caller's back
    pub fn forget_container(&self, id: &str) {
        self.with(|e| {
            e.containers.remove(id);
        })
    }

    /// Stop a container behind the caller's back
    pub fn halt_container(&self, id: &str) {
        self.with(|e| {
            if let Some(container) = e.containers.get_mut(id) {
                container.running = false;
            }
        })
    }

    pub fn set_build_delay(&self, delay: Duration) {
        self.with(|e| e.build_delay = delay)
    }

    /// Commands containing `pattern` exit with `code`
    pub fn set_exit_code(&self, pattern: &str, code: i32) {
        self.with(|e| e.exit_codes.push((pattern.to_string(), code)))
    }

    pub fn fail_stops(&self) {
        self.with(|e| e.fail_stop = true)
    }

    /// The next copy into `to` fails
    pub fn fail_next_copy_to(&self, to: &str) {
        self.with(|e| e.failing_copies.push(to.to_string()))
    }

    fn next_id(&self, prefix: &str) -> String {
        self.with(|e| {
            e.next_id += 1;
            format!("{}{:04}", prefix, e.next_id)
        })
    }

    fn require_container(&self, id: &str) -> NavoResult<()> {
        if self.with(|e| e.containers.contains_key(id)) {
            Ok(())
        } else {
            Err(NavoError::ContainerNotFound(id.to_string()))
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_ready(&self) -> NavoResult<()> {
        Ok(())
    }

    async fn image_exists(&self, reference: &str) -> NavoResult<bool> {
        Ok(self.image_id(reference).await?.is_some())
    }

    async fn image_id(&self, reference: &str) -> NavoResult<Option<String>> {
        Ok(self.with(|e| {
            if e.images.contains(reference) {
                Some(reference.to_string())
            } else {
                e.tags.get(reference).cloned()
            }
        }))
    }

    async fn build_image(
        &self,
        _context: &Path,
        dockerfile: &Path,
        tag: &str,
        on_output: OutputSink<'_>,
    ) -> NavoResult<String> {
        let delay = self.with(|e| e.build_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let id = self.next_id("sha256:fake");
        on_output(OutputChunk::stdout(format!("Step 1/1 : {}", dockerfile.display())));
        self.with(|e| {
            e.builds += 1;
            e.images.insert(id.clone());
            e.tags.insert(tag.to_string(), id.clone());
        });
        Ok(id)
    }

    async fn tag_image(&self, image_id: &str, tag: &str) -> NavoResult<()> {
        self.with(|e| {
            e.tags.insert(tag.to_string(), image_id.to_string());
        });
        Ok(())
    }

    async fn remove_image(&self, reference: &str) -> NavoResult<()> {
        self.with(|e| {
            if e.tags.remove(reference).is_none() {
                e.images.remove(reference);
            }
        });
        Ok(())
    }

    async fn container_exists(&self, container_id: &str) -> NavoResult<bool> {
        Ok(self.with(|e| e.containers.contains_key(container_id)))
    }

    async fn is_running(&self, container_id: &str) -> NavoResult<bool> {
        Ok(self.with(|e| {
            e.containers
                .get(container_id)
                .map(|c| c.running)
                .unwrap_or(false)
        }))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> NavoResult<String> {
        let id = self.next_id("container");
        self.with(|e| {
            e.creates += 1;
            e.containers.insert(
                id.clone(),
                FakeContainer {
                    spec: spec.clone(),
                    running: false,
                },
            );
        });
        Ok(id)
    }

    async fn start(&self, container_id: &str) -> NavoResult<()> {
        self.require_container(container_id)?;
        self.with(|e| {
            e.starts += 1;
            if let Some(container) = e.containers.get_mut(container_id) {
                container.running = true;
            }
        });
        Ok(())
    }

    async fn stop(&self, container_id: &str, _timeout: Duration) -> NavoResult<()> {
        self.require_container(container_id)?;
        let fail = self.with(|e| {
            e.stops += 1;
            if !e.fail_stop {
                if let Some(container) = e.containers.get_mut(container_id) {
                    container.running = false;
                }
            }
            e.fail_stop
        });
        if fail {
            return Err(NavoError::command_exec(
                format!("stop {}", container_id),
                "timed out",
            ));
        }
        Ok(())
    }

    async fn wait(&self, container_id: &str, _timeout: Duration) -> NavoResult<()> {
        self.require_container(container_id)?;
        self.with(|e| {
            if let Some(container) = e.containers.get_mut(container_id) {
                container.running = false;
            }
        });
        Ok(())
    }

    async fn remove(&self, container_id: &str) -> NavoResult<()> {
        self.with(|e| {
            e.removes += 1;
            e.containers.remove(container_id);
        });
        Ok(())
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &[String],
        _stdin: Option<&[u8]>,
        on_output: OutputSink<'_>,
    ) -> NavoResult<ExecOutput> {
        self.require_container(container_id)?;
        let line = command.join(" ");
        let exit_code = self.with(|e| {
            e.execs.push(line.clone());
            e.exit_codes
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, code)| *code)
                .unwrap_or(0)
        });

        on_output(OutputChunk::stdout(format!("ran {}", line)));
        Ok(ExecOutput {
            stdout: format!("ran {}\n", line),
            stderr: String::new(),
            exit_code,
        })
    }

    async fn copy_to(&self, container_id: &str, from: &Path, to: &str) -> NavoResult<()> {
        self.require_container(container_id)?;
        let failed = self.with(|e| match e.failing_copies.iter().position(|d| d == to) {
            Some(index) => {
                e.failing_copies.remove(index);
                true
            }
            None => {
                e.copies.push((from.to_path_buf(), to.to_string()));
                false
            }
        });
        if failed {
            return Err(NavoError::command_exec(
                format!("cp {} {}:{}", from.display(), container_id, to),
                "no space left on device",
            ));
        }
        Ok(())
    }

    async fn exec_interactive(
        &self,
        container_id: &str,
        command: &[String],
        _detach_keys: &str,
    ) -> NavoResult<i32> {
        self.require_container(container_id)?;
        self.with(|e| e.execs.push(command.join(" ")));
        Ok(0)
    }

    fn runtime_name(&self) -> &'static str {
        "Fake"
    }
}

/// Resolver that "vendors" a single marker file
pub struct FakeResolver {
    lockfile: PathBuf,
    installs: AtomicUsize,
    vendors: AtomicUsize,
    fail_vendor: AtomicBool,
}

impl FakeResolver {
    pub fn new(lockfile: impl Into<PathBuf>) -> Self {
        Self {
            lockfile: lockfile.into(),
            installs: AtomicUsize::new(0),
            vendors: AtomicUsize::new(0),
            fail_vendor: AtomicBool::new(false),
        }
    }

    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }

    pub fn vendor_count(&self) -> usize {
        self.vendors.load(Ordering::SeqCst)
    }

    pub fn fail_next_vendor(&self) {
        self.fail_vendor.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DependencyResolver for FakeResolver {
    async fn install(&self) -> NavoResult<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn vendor(&self, destination: &Path) -> NavoResult<()> {
        self.vendors.fetch_add(1, Ordering::SeqCst);
        if self.fail_vendor.swap(false, Ordering::SeqCst) {
            return Err(NavoError::DependencyResolution("vendor failed".to_string()));
        }
        std::fs::create_dir_all(destination).unwrap();
        std::fs::write(destination.join("cookbook.txt"), "vendored").unwrap();
        Ok(())
    }

    fn lockfile(&self) -> PathBuf {
        self.lockfile.clone()
    }
}
