//! Persisted key-value state
//!
//! One [`StateFile`] backs one scope: a single suite, or the global scope
//! shared by every suite in the repository. It carries information between
//! invocations of the tool, e.g. the id of a previously started container or
//! the image built for a given Dockerfile.
//!
//! The in-memory map is the only mutable copy. Every mutation rewrites the
//! whole file before returning, and all access to a scope goes through that
//! scope's lock, so no reader in this process ever observes a half-applied
//! change. A crash in the middle of a write can still leave a truncated file
//! behind; [`NavoError::StateCorrupt`] is reported for it on the next load and
//! deleting the file is always safe.

use crate::error::{NavoError, NavoResult};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

/// Mapping stored in a state file
pub type StateMap = Map<String, Value>;

/// Well-known state keys
pub mod keys {
    /// Last known container id (suite scope)
    pub const CONTAINER: &str = "container";
    /// Path to fingerprint map (both scopes)
    pub const FILES: &str = "files";
    /// Dockerfile fingerprint to image id map (global scope)
    pub const IMAGES: &str = "images";
}

/// File-backed state for a single scope
#[derive(Debug)]
pub struct StateFile {
    path: PathBuf,
    map: Mutex<Option<StateMap>>,
}

impl StateFile {
    /// Create a state handle for the given file. Nothing is read until first access.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map: Mutex::new(None),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory map with the current on-disk contents
    pub async fn load(&self) -> NavoResult<()> {
        let mut slot = self.map.lock().await;
        *slot = Some(read_state(&self.path).await?);
        Ok(())
    }

    /// Get the value stored under `key`
    pub async fn get(&self, key: &str) -> NavoResult<Option<Value>> {
        let mut slot = self.map.lock().await;
        let map = ensure_loaded(&self.path, &mut slot).await?;
        Ok(map.get(key).cloned())
    }

    /// Get a string value stored under `key`
    pub async fn get_str(&self, key: &str) -> NavoResult<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    /// Store `value` under `key` and persist immediately
    pub async fn set(&self, key: &str, value: impl Into<Value>) -> NavoResult<()> {
        let value = value.into();
        self.modify(|map| {
            map.insert(key.to_string(), value);
            Ok(())
        })
        .await
    }

    /// Remove `key` and persist immediately
    pub async fn remove(&self, key: &str) -> NavoResult<Option<Value>> {
        self.modify(|map| Ok(map.remove(key))).await
    }

    /// Scoped read-modify-write.
    ///
    /// Holds the scope lock while `f` runs against the live map and saves once
    /// afterwards. When `f` fails, or the save fails, the map is restored to
    /// its previous contents and nothing is committed.
    pub async fn modify<T, F>(&self, f: F) -> NavoResult<T>
    where
        F: FnOnce(&mut StateMap) -> NavoResult<T>,
    {
        let mut slot = self.map.lock().await;
        let map = ensure_loaded(&self.path, &mut slot).await?;
        let before = map.clone();

        let result = match f(map) {
            Ok(result) => result,
            Err(e) => {
                *map = before;
                return Err(e);
            }
        };

        if let Err(e) = write_state(&self.path, map).await {
            *map = before;
            return Err(e);
        }

        Ok(result)
    }

    /// Copy of the whole map
    pub async fn snapshot(&self) -> NavoResult<StateMap> {
        let mut slot = self.map.lock().await;
        Ok(ensure_loaded(&self.path, &mut slot).await?.clone())
    }

    /// Clear all state and delete the backing file
    pub async fn destroy(&self) -> NavoResult<()> {
        let mut slot = self.map.lock().await;
        debug!("Removing state from {}", self.path.display());
        *slot = Some(StateMap::new());

        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NavoError::io(
                format!("removing state file {}", self.path.display()),
                e,
            )),
        }
    }
}

async fn ensure_loaded<'a>(
    path: &Path,
    slot: &'a mut Option<StateMap>,
) -> NavoResult<&'a mut StateMap> {
    if slot.is_none() {
        *slot = Some(read_state(path).await?);
    }
    Ok(slot.get_or_insert_with(StateMap::new))
}

async fn read_state(path: &Path) -> NavoResult<StateMap> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No state file {} exists; assuming empty state", path.display());
            return Ok(StateMap::new());
        }
        Err(e) => {
            return Err(NavoError::io(
                format!("reading state file {}", path.display()),
                e,
            ))
        }
    };

    if content.trim().is_empty() {
        return Ok(StateMap::new());
    }

    debug!("Loading state from {}", path.display());
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(NavoError::StateCorrupt {
            path: path.to_path_buf(),
            reason: "top-level value is not a mapping".to_string(),
        }),
        Err(e) => Err(NavoError::StateCorrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

async fn write_state(path: &Path, map: &StateMap) -> NavoResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| NavoError::io(format!("creating directory {}", parent.display()), e))?;
    }

    let content = serde_json::to_string_pretty(map)?;
    debug!("Saving state to {}", path.display());
    fs::write(path, content)
        .await
        .map_err(|e| NavoError::io(format!("writing state file {}", path.display()), e))
}
