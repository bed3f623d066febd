//! Suite lifecycle
//!
//! A suite is a named sandbox: one image, one container, one chef run-list.
//! Its persisted state (`.navo/suites/<name>/state.json`) is the source of
//! truth for where it is in the lifecycle:
//!
//! ```text
//! absent ──create──▶ created ──converge──▶ converged ──verify──▶ verified
//!    ▲                                                              │
//!    └──────────────────────────── destroy ─────────────────────────┘
//! ```
//!
//! Every operation is idempotent and implies the ones before it, so any of
//! them can be run on its own.

pub mod log;
mod sandbox;

pub use log::SuiteLog;

use crate::config::SuiteConfig;
use crate::context::RunContext;
use crate::error::{NavoError, NavoResult};
use crate::fingerprint::{forget, has_changed};
use crate::orchestration::{ContainerSpec, ExecOutput, OutputChunk};
use crate::state::{keys, StateFile};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::fs;
use tracing::Level;

/// Chef configuration directory inside the container
pub const CHEF_CONFIG_DIR: &str = "/etc/chef";

/// Chef working directory (cookbooks, data bags, caches) inside the container
pub const CHEF_RUN_DIR: &str = "/var/chef";

/// Busser installation root inside the container
pub const BUSSER_DIR: &str = "/tmp/busser";

const CHEF_SOLO: &str = "/opt/chef/embedded/bin/chef-solo";

/// Point-in-time view of a suite, as shown by `navo list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuiteStatus {
    pub name: String,
    pub container: Option<String>,
    pub running: bool,
}

/// One suite, bound to the shared run context
pub struct Suite {
    name: String,
    config: SuiteConfig,
    ctx: Arc<RunContext>,
    state: StateFile,
    log: SuiteLog,
    /// Container handle resolved during this invocation
    container: Mutex<Option<String>>,
}

impl Suite {
    /// Load suite `name`, truncating its log file
    pub fn new(ctx: Arc<RunContext>, name: &str) -> NavoResult<Self> {
        let config = ctx
            .project
            .config
            .suites
            .get(name)
            .cloned()
            .ok_or_else(|| NavoError::NoSuitesMatched(name.to_string()))?;

        let dir = ctx.project.suite_dir(name);
        let log = SuiteLog::open(dir.join("log.log"))?;

        Ok(Self {
            name: name.to_string(),
            config,
            state: StateFile::new(dir.join("state.json")),
            log,
            ctx,
            container: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log(&self) -> &SuiteLog {
        &self.log
    }

    pub fn state(&self) -> &StateFile {
        &self.state
    }

    /// Hostname for the container; underscores are not valid in hostnames
    pub fn hostname(&self) -> String {
        self.config
            .hostname
            .as_deref()
            .unwrap_or(&self.name)
            .replace('_', "-")
    }

    /// Container name, unique per repository so two checkouts can run the
    /// same suite side by side
    pub fn container_name(&self) -> String {
        let digest = Sha256::digest(self.ctx.project.repo_root.to_string_lossy().as_bytes());
        let suffix = hex::encode(digest);
        format!("navo-{}-{}", self.name, &suffix[..5])
    }

    fn image_tag(&self) -> String {
        format!("{}:{}", self.ctx.project.config.docker.repo, self.name)
    }

    /// Node attributes handed to chef-solo: shared attributes, overridden by
    /// the suite's own, plus the run list
    pub fn node_attributes(&self) -> NavoResult<Value> {
        if self.config.run_list.is_empty() {
            return Err(NavoError::ConfigInvalid {
                path: self.ctx.project.config_path.clone(),
                reason: format!("No `run_list` specified for suite {}", self.name),
            });
        }

        let mut attributes = match serde_json::to_value(&self.ctx.project.config.chef.attributes)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Value::Object(overrides) = serde_json::to_value(&self.config.attributes)? {
            attributes.extend(overrides);
        }
        attributes.insert(
            "run_list".to_string(),
            Value::from(self.config.run_list.clone()),
        );

        Ok(Value::Object(attributes))
    }

    /// Contents of `solo.rb`
    pub fn chef_solo_config(&self) -> String {
        let chef = &self.ctx.project.config.chef;
        let run = |dir: &str| format!("{}/{}", CHEF_RUN_DIR, dir);

        [
            format!("node_name {:?}", self.hostname()),
            format!("environment {:?}", chef.environment),
            format!("file_cache_path {:?}", run("cache")),
            format!("file_backup_path {:?}", run("backup")),
            format!("cookbook_path {:?}", run("cookbooks")),
            format!("data_bag_path {:?}", run("data_bags")),
            format!("environment_path {:?}", run("environments")),
            format!("role_path {:?}", run("roles")),
            format!(
                "encrypted_data_bag_secret {:?}",
                format!("{}/encrypted_data_bag_secret", CHEF_CONFIG_DIR)
            ),
        ]
        .join("\n")
            + "\n"
    }

    fn busser_env(&self) -> Vec<String> {
        vec![
            format!("BUSSER_ROOT={}", BUSSER_DIR),
            format!("GEM_HOME={}/gems", BUSSER_DIR),
            format!("GEM_PATH={}/gems", BUSSER_DIR),
            format!("GEM_CACHE={}/gems/cache", BUSSER_DIR),
        ]
    }

    /// Make sure the suite's image and container exist and the container is
    /// running. Returns the container id.
    pub async fn create(&self) -> NavoResult<String> {
        self.log.event(format!("Creating {}", self.name));
        let id = self.container().await?;
        self.log.event(format!("Created {} in container {}", self.name, id));
        Ok(id)
    }

    /// Create, then apply the suite's run list with chef-solo
    pub async fn converge(&self) -> NavoResult<bool> {
        let attributes = self.node_attributes()?;
        self.create().await?;

        self.log.event(format!("Converging {}", self.name));
        sandbox::update_chef_config(self, &attributes).await?;

        let config = format!("--config={}/solo.rb", CHEF_CONFIG_DIR);
        let json = format!("--json-attributes={}/first-boot.json", CHEF_CONFIG_DIR);
        let output = self
            .exec(&[CHEF_SOLO, config.as_str(), json.as_str()], Level::INFO)
            .await?;

        self.report("Converge", &output);
        Ok(output.success())
    }

    /// Create, then run the suite's integration tests with busser
    pub async fn verify(&self) -> NavoResult<bool> {
        self.create().await?;

        self.log.event(format!("Verifying {}", self.name));
        if !sandbox::update_test_config(self).await? {
            self.log.warn(format!(
                "No test files found for suite {} in test/integration/{}; nothing to verify",
                self.name, self.name
            ));
            return Ok(true);
        }

        let mut command = vec!["/usr/bin/env".to_string()];
        command.extend(self.busser_env());
        command.push(format!("{}/gems/bin/busser", BUSSER_DIR));
        command.push("test".to_string());
        let output = self.exec(&command, Level::INFO).await?;

        self.report("Verify", &output);
        Ok(output.success())
    }

    /// Destroy, converge, verify, then destroy again according to the
    /// configured destroy policy. Returns whether converge and verify passed.
    pub async fn test(&self) -> NavoResult<bool> {
        self.destroy().await?;

        let result = match self.converge().await {
            Ok(true) => self.verify().await,
            other => other,
        };
        let passed = matches!(result, Ok(true));

        let policy = self.ctx.project.config.destroy;
        if policy.should_destroy(passed) {
            let destroyed = self.destroy().await;
            // The run's own error takes precedence over a teardown error
            let passed = result?;
            destroyed?;
            Ok(passed)
        } else {
            self.log.info(format!(
                "Leaving {} running (destroy policy '{}')",
                self.name, policy
            ));
            result
        }
    }

    /// Dockerfile the suite's image is built from
    pub fn dockerfile(&self) -> PathBuf {
        let docker = &self.ctx.project.config.docker;
        self.ctx
            .project
            .resolve(self.config.dockerfile.as_deref().unwrap_or(&docker.dockerfile))
    }

    /// Stop and remove the suite's container, then clear its state.
    ///
    /// Stop and remove failures are only warnings; persisted state is cleared
    /// regardless, so destroying twice is harmless.
    pub async fn destroy(&self) -> NavoResult<()> {
        self.log.event(format!("Destroying {}", self.name));

        match self.state.get_str(keys::CONTAINER).await {
            Ok(Some(id)) => self.teardown(&id).await,
            Ok(None) => self.log.debug("No container recorded"),
            Err(e) => self.log.warn(format!("Unable to read recorded container: {}", e)),
        }

        self.forget_container();
        self.state.destroy().await?;

        self.log.event(format!("Destroyed {}", self.name));
        Ok(())
    }

    /// Attach an interactive shell to the suite's container
    pub async fn login(&self) -> NavoResult<i32> {
        let id = self.container().await?;
        let docker = &self.ctx.project.config.docker;
        self.ctx
            .runtime
            .exec_interactive(&id, &docker.shell_command, &docker.detach_keys)
            .await
    }

    /// Current status of suite `name`, read without touching its log
    pub async fn status(ctx: &RunContext, name: &str) -> NavoResult<SuiteStatus> {
        let state = StateFile::new(ctx.project.suite_dir(name).join("state.json"));
        let container = state.get_str(keys::CONTAINER).await?;
        let running = match &container {
            Some(id) => ctx.runtime.is_running(id).await?,
            None => false,
        };

        Ok(SuiteStatus {
            name: name.to_string(),
            container,
            running,
        })
    }

    /// Run a command in the container, logging its output at `level`
    pub async fn exec<S: AsRef<str>>(&self, args: &[S], level: Level) -> NavoResult<ExecOutput> {
        let id = self.container().await?;
        let command: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        self.log.debug(format!("Executing {:?}", command));

        let sink = |chunk: OutputChunk| self.log.output(level, &chunk);
        self.ctx.runtime.exec(&id, &command, None, &sink).await
    }

    /// Like [`Suite::exec`], but a non-zero exit is an error
    pub async fn exec_checked<S: AsRef<str>>(
        &self,
        args: &[S],
        level: Level,
    ) -> NavoResult<ExecOutput> {
        let output = self.exec(args, level).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(NavoError::ContainerCommand {
                command: args
                    .iter()
                    .map(|a| a.as_ref())
                    .collect::<Vec<_>>()
                    .join(" "),
                code: output.exit_code,
            })
        }
    }

    /// Copy a host file or directory to `to` in the container
    pub async fn copy(&self, from: &Path, to: &str) -> NavoResult<()> {
        let id = self.container().await?;
        self.log.debug(format!(
            "Copying {} on host to {} in container",
            from.display(),
            to
        ));
        self.ctx.runtime.copy_to(&id, from, to).await
    }

    /// Copy `from` to `to` only if its contents changed since the last copy
    /// into this suite's container. Directories are copied as their contents;
    /// with `replace` the destination is removed first so nothing stale
    /// survives. Returns whether a copy happened.
    pub async fn copy_if_changed(&self, from: &Path, to: &str, replace: bool) -> NavoResult<bool> {
        let is_dir = fs::metadata(from).await.map(|m| m.is_dir()).unwrap_or(false);
        let parent = if is_dir {
            to.to_string()
        } else {
            Path::new(to)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| "/".to_string())
        };
        self.exec_checked(&["mkdir", "-p", parent.as_str()], Level::DEBUG)
            .await?;

        if !has_changed(&self.state, from).await? {
            self.log
                .debug(format!("{} unchanged since last copy; skipping", from.display()));
            return Ok(false);
        }

        let copied: NavoResult<()> = async {
            if replace {
                self.exec_checked(&["rm", "-rf", to], Level::DEBUG).await?;
                if is_dir {
                    self.exec_checked(&["mkdir", "-p", to], Level::DEBUG).await?;
                }
            }
            if is_dir {
                self.copy(&from.join("."), to).await
            } else {
                self.copy(from, to).await
            }
        }
        .await;

        if let Err(e) = copied {
            // Recorded as copied, but it never arrived
            forget(&self.state, from).await?;
            return Err(e);
        }
        Ok(true)
    }

    /// Write `content` to `file` in the container
    pub async fn write(&self, file: &str, content: &str) -> NavoResult<()> {
        let id = self.container().await?;
        self.log.debug(format!("Writing {} to {} in container", content.trim_end(), file));

        let command = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("cat > {}", file),
        ];
        let sink = |chunk: OutputChunk| self.log.output(Level::DEBUG, &chunk);
        let output = self
            .ctx
            .runtime
            .exec(&id, &command, Some(content.as_bytes()), &sink)
            .await?;

        if output.success() {
            Ok(())
        } else {
            Err(NavoError::ContainerCommand {
                command: command.join(" "),
                code: output.exit_code,
            })
        }
    }

    fn cached_container(&self) -> Option<String> {
        self.container
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_container(&self, id: &str) {
        *self.container.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
    }

    fn forget_container(&self) {
        *self.container.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Resolve the running container, building the image and creating or
    /// starting the container as needed
    async fn container(&self) -> NavoResult<String> {
        if let Some(id) = self.cached_container() {
            return Ok(id);
        }

        // Image first so its build output precedes container creation
        let dockerfile = self.dockerfile();
        let image = self
            .ctx
            .images
            .ensure(&dockerfile, &self.image_tag(), &self.log)
            .await?;

        let existing = match self.state.get_str(keys::CONTAINER).await? {
            Some(id) => {
                if self.ctx.runtime.container_exists(&id).await? {
                    self.log.debug(format!("Loaded existing container {}", id));
                    Some(id)
                } else {
                    self.log.debug(format!("Container {} no longer exists", id));
                    None
                }
            }
            None => None,
        };

        let id = match existing {
            Some(id) => id,
            None => self.create_container(&image).await?,
        };

        if self.ctx.runtime.is_running(&id).await? {
            self.log.debug(format!("Container {} already running", id));
        } else {
            self.log.info(format!("Starting container {}", id));
            self.ctx.runtime.start(&id).await?;
        }

        self.remember_container(&id);
        Ok(id)
    }

    async fn create_container(&self, image: &str) -> NavoResult<String> {
        let docker = &self.ctx.project.config.docker;
        let name = self.container_name();

        // A container holding our name but missing from state (e.g. the state
        // file was deleted) would make creation fail
        if self.ctx.runtime.container_exists(&name).await? {
            self.log
                .debug(format!("Removing unrecorded container {}", name));
            self.ctx.runtime.remove(&name).await?;
        }

        self.log
            .info(format!("Building a new container from image {}", image));

        let mut spec = ContainerSpec {
            name,
            image: image.to_string(),
            hostname: self.hostname(),
            privileged: docker.privileged,
            ..Default::default()
        };
        spec.add_volume_specs(docker.volumes.iter().chain(&self.config.volumes).cloned());

        let id = self.ctx.runtime.create_container(&spec).await?;

        // Files recorded for the old container were never copied into this one
        let container = id.clone();
        self.state
            .modify(move |map| {
                map.remove(keys::FILES);
                map.insert(keys::CONTAINER.to_string(), Value::String(container));
                Ok(())
            })
            .await?;

        Ok(id)
    }

    async fn teardown(&self, id: &str) {
        let runtime = &self.ctx.runtime;
        let docker = &self.ctx.project.config.docker;

        match runtime.container_exists(id).await {
            Ok(true) => {}
            Ok(false) => {
                self.log.debug(format!("Container {} no longer exists", id));
                return;
            }
            Err(e) => self.log.warn(format!("Unable to inspect container {}: {}", id, e)),
        }

        let timeout = Duration::from_secs(docker.stop_timeout);
        let stopped = match &docker.stop_command {
            Some(command) => {
                self.log.info(format!(
                    "Stopping container {} via command {:?}",
                    id, command
                ));
                let sink = |chunk: OutputChunk| self.log.output(Level::DEBUG, &chunk);
                match runtime.exec(id, command, None, &sink).await {
                    Ok(_) => runtime.wait(id, timeout).await,
                    Err(e) => Err(e),
                }
            }
            None => {
                self.log.info(format!("Stopping container {}...", id));
                runtime.stop(id, timeout).await
            }
        };
        if let Err(e) = stopped {
            self.log
                .warn(format!("Unable to stop container {}: {}", id, e));
        }

        self.log.info(format!("Removing container {}", id));
        if let Err(e) = runtime.remove(id).await {
            self.log
                .warn(format!("Unable to remove container {}: {}", id, e));
        }
    }

    fn report(&self, step: &str, output: &ExecOutput) {
        if output.success() {
            self.log.info(format!("{} of {} succeeded", step, self.name));
        } else {
            self.log.error(format!(
                "{} of {} failed with exit code {}",
                step, self.name, output.exit_code
            ));
        }
    }
}
