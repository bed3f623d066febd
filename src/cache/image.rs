//! Image cache
//!
//! Images are keyed by the fingerprint of their Dockerfile and recorded in
//! global state under `images`, so suites sharing a Dockerfile (in this run or
//! a later one) build it once. Builds for one Dockerfile are serialized and
//! the cache is re-checked after acquiring the lock, so a suite that waited on
//! another suite's build reuses its result instead of building again.

use crate::error::{NavoError, NavoResult};
use crate::fingerprint::{fingerprint, ABSENT};
use crate::orchestration::{ContainerRuntime, OutputChunk};
use crate::state::{keys, StateFile};
use crate::suite::SuiteLog;
use crate::sync::KeyedMutex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;

/// Shared image cache used by every suite in a run
pub struct ImageCache {
    runtime: Arc<dyn ContainerRuntime>,
    global: Arc<StateFile>,
    locks: Arc<KeyedMutex<PathBuf>>,
}

impl ImageCache {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        global: Arc<StateFile>,
        locks: Arc<KeyedMutex<PathBuf>>,
    ) -> Self {
        Self {
            runtime,
            global,
            locks,
        }
    }

    /// Return an image id for `dockerfile`, building it only when no usable
    /// image is recorded, and make sure `tag` points at it.
    pub async fn ensure(&self, dockerfile: &Path, tag: &str, log: &SuiteLog) -> NavoResult<String> {
        let dockerfile = dockerfile.to_path_buf();

        // Fast path without the lock
        let image_id = match self.lookup(&dockerfile, log).await? {
            Some(image_id) => image_id,
            None => {
                let this = self;
                let key = dockerfile.clone();
                self.locks
                    .synchronize(&key, || async move {
                        // Another suite may have built it while we waited
                        match this.lookup(&dockerfile, log).await? {
                            Some(image_id) => Ok(image_id),
                            None => this.build(&dockerfile, tag, log).await,
                        }
                    })
                    .await?
            }
        };

        self.retag(&image_id, tag, log).await?;
        Ok(image_id)
    }

    /// Recorded image for the Dockerfile's current contents, if it still exists
    async fn lookup(&self, dockerfile: &Path, log: &SuiteLog) -> NavoResult<Option<String>> {
        let hash = dockerfile_hash(dockerfile).await?;
        let recorded = self
            .global
            .get(keys::IMAGES)
            .await?
            .and_then(|images| images.get(&hash).and_then(Value::as_str).map(str::to_string));

        let Some(image_id) = recorded else {
            log.debug(format!("No image recorded for {} ({})", dockerfile.display(), hash));
            return Ok(None);
        };

        if self.runtime.image_exists(&image_id).await? {
            log.debug(format!(
                "Previous image {} matching Dockerfile already exists",
                image_id
            ));
            Ok(Some(image_id))
        } else {
            log.debug(format!("Recorded image {} no longer exists", image_id));
            Ok(None)
        }
    }

    async fn build(&self, dockerfile: &Path, tag: &str, log: &SuiteLog) -> NavoResult<String> {
        let hash = dockerfile_hash(dockerfile).await?;
        let build_dir = dockerfile.parent().unwrap_or_else(|| Path::new("."));

        log.info(format!(
            "Building a new image with {} using {} as build context directory",
            dockerfile.display(),
            build_dir.display()
        ));

        let sink = |chunk: OutputChunk| log.output(Level::INFO, &chunk);
        let image_id = self
            .runtime
            .build_image(build_dir, dockerfile, tag, &sink)
            .await?;

        self.global
            .modify(|map| {
                let images = map
                    .entry(keys::IMAGES.to_string())
                    .or_insert_with(|| Value::Object(Default::default()));
                match images.as_object_mut() {
                    Some(images) => {
                        images.insert(hash.clone(), Value::String(image_id.clone()));
                        Ok(())
                    }
                    None => Err(NavoError::StateCorrupt {
                        path: self.global.path().to_path_buf(),
                        reason: format!("'{}' is not a mapping", keys::IMAGES),
                    }),
                }
            })
            .await?;

        log.info(format!("Built image {}", image_id));
        Ok(image_id)
    }

    /// Point `tag` at `image_id`, untagging whatever image held it before
    async fn retag(&self, image_id: &str, tag: &str, log: &SuiteLog) -> NavoResult<()> {
        match self.runtime.image_id(tag).await? {
            Some(current) if current == image_id => return Ok(()),
            Some(current) => {
                if let Err(e) = self.runtime.remove_image(tag).await {
                    log.warn(format!(
                        "Unable to remove tag from previous '{}' image ({}): {}",
                        tag, current, e
                    ));
                    return Ok(());
                }
            }
            None => {}
        }

        log.debug(format!("Tagging {} with '{}'", image_id, tag));
        self.runtime.tag_image(image_id, tag).await
    }
}

async fn dockerfile_hash(dockerfile: &Path) -> NavoResult<String> {
    let hash = fingerprint(dockerfile).await?;
    if hash == ABSENT {
        return Err(NavoError::PathNotFound(dockerfile.to_path_buf()));
    }
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        runtime: Arc<FakeRuntime>,
        cache: Arc<ImageCache>,
        global: Arc<StateFile>,
        log: SuiteLog,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM centos:7\n").unwrap();
        let runtime = Arc::new(FakeRuntime::new());
        let global = Arc::new(StateFile::new(dir.path().join(".navo/state.json")));
        let cache = Arc::new(ImageCache::new(
            runtime.clone(),
            global.clone(),
            Arc::new(KeyedMutex::new()),
        ));
        let log = SuiteLog::open(dir.path().join("log.log")).unwrap();
        Fixture {
            dir,
            runtime,
            cache,
            global,
            log,
        }
    }

    #[tokio::test]
    async fn builds_once_and_records_image() {
        let f = fixture();
        let dockerfile = f.dir.path().join("Dockerfile");

        let first = f.cache.ensure(&dockerfile, "navo:web", &f.log).await.unwrap();
        let second = f.cache.ensure(&dockerfile, "navo:db", &f.log).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(f.runtime.build_count(), 1);

        let hash = fingerprint(&dockerfile).await.unwrap();
        let images = f.global.get(keys::IMAGES).await.unwrap().unwrap();
        assert_eq!(images[&hash], Value::String(first.clone()));
        assert_eq!(f.runtime.image_for_tag("navo:db").as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn rebuilds_when_dockerfile_changes() {
        let f = fixture();
        let dockerfile = f.dir.path().join("Dockerfile");

        let first = f.cache.ensure(&dockerfile, "navo:web", &f.log).await.unwrap();
        std::fs::write(&dockerfile, "FROM centos:8\n").unwrap();
        let second = f.cache.ensure(&dockerfile, "navo:web", &f.log).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(f.runtime.build_count(), 2);
        assert_eq!(f.runtime.image_for_tag("navo:web").as_deref(), Some(second.as_str()));
    }

    #[tokio::test]
    async fn rebuilds_when_recorded_image_vanished() {
        let f = fixture();
        let dockerfile = f.dir.path().join("Dockerfile");

        let first = f.cache.ensure(&dockerfile, "navo:web", &f.log).await.unwrap();
        f.runtime.forget_image(&first);
        let second = f.cache.ensure(&dockerfile, "navo:web", &f.log).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(f.runtime.build_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_suites_share_one_build() {
        let f = fixture();
        f.runtime.set_build_delay(std::time::Duration::from_millis(50));
        let dockerfile = f.dir.path().join("Dockerfile");

        let log_a = SuiteLog::open(f.dir.path().join("a.log")).unwrap();
        let log_b = SuiteLog::open(f.dir.path().join("b.log")).unwrap();
        let (a, b) = tokio::join!(
            f.cache.ensure(&dockerfile, "navo:a", &log_a),
            f.cache.ensure(&dockerfile, "navo:b", &log_b),
        );

        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(f.runtime.build_count(), 1);
    }

    #[tokio::test]
    async fn missing_dockerfile_is_an_error() {
        let f = fixture();
        let err = f
            .cache
            .ensure(&f.dir.path().join("nope/Dockerfile"), "navo:web", &f.log)
            .await
            .unwrap_err();
        assert!(matches!(err, NavoError::PathNotFound(_)));
    }
}
