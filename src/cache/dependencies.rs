//! Shared cookbook dependencies
//!
//! Every suite needs the same resolved cookbook set, so resolution is done
//! once per process and the vendored output is shared. Vendoring is redone
//! only when the lockfile's fingerprint changes (tracked in global state) or
//! the vendored directory has gone missing.

use crate::error::{NavoError, NavoResult};
use crate::fingerprint::{forget, has_changed};
use crate::state::StateFile;
use crate::suite::SuiteLog;
use crate::sync::KeyedMutex;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

/// Dependency resolver interface (install, then vendor into a directory)
#[async_trait]
pub trait DependencyResolver: Send + Sync {
    /// Resolve and download dependencies, updating the lockfile
    async fn install(&self) -> NavoResult<()>;

    /// Materialize resolved dependencies into `destination`, which must not exist
    async fn vendor(&self, destination: &Path) -> NavoResult<()>;

    /// File whose contents fully determine the vendored output
    fn lockfile(&self) -> PathBuf;
}

/// Berkshelf resolver driven through the `berks` CLI
pub struct Berkshelf {
    program: String,
    berksfile: PathBuf,
}

impl Berkshelf {
    pub fn new(berksfile: impl Into<PathBuf>) -> Self {
        Self {
            program: "berks".to_string(),
            berksfile: berksfile.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> NavoResult<()> {
        debug!("Executing: {} {:?}", self.program, args);

        let output = Command::new(&self.program)
            .args(args)
            .arg("--berksfile")
            .arg(&self.berksfile)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| NavoError::command_failed(format!("{} {}", self.program, args.join(" ")), e))?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            Err(NavoError::DependencyResolution(
                crate::orchestration::build_error_output(&stdout, &stderr),
            ))
        }
    }
}

#[async_trait]
impl DependencyResolver for Berkshelf {
    async fn install(&self) -> NavoResult<()> {
        self.run(&["install"]).await
    }

    async fn vendor(&self, destination: &Path) -> NavoResult<()> {
        let destination = destination.to_string_lossy();
        self.run(&["vendor", &destination]).await
    }

    fn lockfile(&self) -> PathBuf {
        let mut name = self.berksfile.clone().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }
}

/// Process-wide cache of the vendored dependency directory
pub struct DependencyCache {
    resolver: Arc<dyn DependencyResolver>,
    global: Arc<StateFile>,
    locks: Arc<KeyedMutex<PathBuf>>,
    vendor_dir: PathBuf,
    installed: AtomicBool,
}

impl DependencyCache {
    pub fn new(
        resolver: Arc<dyn DependencyResolver>,
        global: Arc<StateFile>,
        locks: Arc<KeyedMutex<PathBuf>>,
        vendor_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            global,
            locks,
            vendor_dir: vendor_dir.into(),
            installed: AtomicBool::new(false),
        }
    }

    /// Make sure dependencies are resolved and vendored, returning the
    /// vendored directory. Only one suite does this work at a time.
    pub async fn prepare(&self, log: &SuiteLog) -> NavoResult<PathBuf> {
        let this = self;
        self.locks
            .synchronize_global(|| async move {
                if this.installed.load(Ordering::SeqCst) {
                    log.info("Berksfile cookbooks already resolved");
                } else {
                    log.info("Resolving Berksfile...");
                    this.resolver.install().await?;
                    this.installed.store(true, Ordering::SeqCst);
                }

                let lockfile = this.resolver.lockfile();
                let changed = has_changed(&this.global, &lockfile).await?;
                let missing = fs::metadata(&this.vendor_dir).await.is_err();

                if changed || missing {
                    log.info(format!("Vendoring cookbooks into {}", this.vendor_dir.display()));
                    if let Err(e) = this.revendor().await {
                        // Make the next attempt vendor again
                        forget(&this.global, &lockfile).await?;
                        return Err(e);
                    }
                } else {
                    log.debug(format!(
                        "{} unchanged; reusing vendored cookbooks",
                        lockfile.display()
                    ));
                }

                Ok(this.vendor_dir.clone())
            })
            .await
    }

    /// Vendor into a staging directory and swap it into place
    async fn revendor(&self) -> NavoResult<()> {
        let parent = self
            .vendor_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| NavoError::io(format!("creating directory {}", parent.display()), e))?;

        let staging = parent.join(format!(".vendor-{}", Uuid::new_v4()));
        if let Err(e) = self.resolver.vendor(&staging).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if fs::metadata(&self.vendor_dir).await.is_ok() {
            fs::remove_dir_all(&self.vendor_dir).await.map_err(|e| {
                NavoError::io(format!("removing {}", self.vendor_dir.display()), e)
            })?;
        }

        fs::rename(&staging, &self.vendor_dir).await.map_err(|e| {
            NavoError::io(format!("moving vendored cookbooks to {}", self.vendor_dir.display()), e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeResolver;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir, resolver: Arc<FakeResolver>) -> DependencyCache {
        DependencyCache::new(
            resolver,
            Arc::new(StateFile::new(dir.path().join(".navo/state.json"))),
            Arc::new(KeyedMutex::new()),
            dir.path().join(".navo/cookbooks"),
        )
    }

    #[test]
    fn berkshelf_lockfile_path() {
        let berks = Berkshelf::new("/repo/Berksfile");
        assert_eq!(berks.lockfile(), PathBuf::from("/repo/Berksfile.lock"));
    }

    #[tokio::test]
    async fn installs_once_and_vendors_on_change_only() {
        let dir = TempDir::new().unwrap();
        let resolver = Arc::new(FakeResolver::new(dir.path().join("Berksfile.lock")));
        std::fs::write(resolver.lockfile(), "nginx (1.0)").unwrap();
        let cache = cache_in(&dir, resolver.clone());
        let log = SuiteLog::open(dir.path().join("log.log")).unwrap();

        let vendored = cache.prepare(&log).await.unwrap();
        cache.prepare(&log).await.unwrap();

        assert_eq!(resolver.install_count(), 1);
        assert_eq!(resolver.vendor_count(), 1);
        assert!(vendored.join("cookbook.txt").exists());

        std::fs::write(resolver.lockfile(), "nginx (2.0)").unwrap();
        cache.prepare(&log).await.unwrap();
        assert_eq!(resolver.install_count(), 1);
        assert_eq!(resolver.vendor_count(), 2);
    }

    #[tokio::test]
    async fn revendors_when_directory_missing() {
        let dir = TempDir::new().unwrap();
        let resolver = Arc::new(FakeResolver::new(dir.path().join("Berksfile.lock")));
        std::fs::write(resolver.lockfile(), "lock").unwrap();
        let cache = cache_in(&dir, resolver.clone());
        let log = SuiteLog::open(dir.path().join("log.log")).unwrap();

        let vendored = cache.prepare(&log).await.unwrap();
        std::fs::remove_dir_all(&vendored).unwrap();
        cache.prepare(&log).await.unwrap();

        assert_eq!(resolver.vendor_count(), 2);
        assert!(vendored.exists());
    }

    #[tokio::test]
    async fn failed_vendor_is_retried() {
        let dir = TempDir::new().unwrap();
        let resolver = Arc::new(FakeResolver::new(dir.path().join("Berksfile.lock")));
        std::fs::write(resolver.lockfile(), "lock").unwrap();
        let cache = cache_in(&dir, resolver.clone());
        let log = SuiteLog::open(dir.path().join("log.log")).unwrap();

        resolver.fail_next_vendor();
        assert!(cache.prepare(&log).await.is_err());

        cache.prepare(&log).await.unwrap();
        assert_eq!(resolver.vendor_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_suites_share_one_vendor() {
        let dir = TempDir::new().unwrap();
        let resolver = Arc::new(FakeResolver::new(dir.path().join("Berksfile.lock")));
        std::fs::write(resolver.lockfile(), "lock").unwrap();
        let cache = Arc::new(cache_in(&dir, resolver.clone()));

        let mut handles = Vec::new();
        for i in 0..4 {
            let cache = Arc::clone(&cache);
            let log = SuiteLog::open(dir.path().join(format!("{}.log", i))).unwrap();
            handles.push(tokio::spawn(async move { cache.prepare(&log).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(resolver.install_count(), 1);
        assert_eq!(resolver.vendor_count(), 1);
    }
}
