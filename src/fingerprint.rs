//! Content fingerprints and change detection
//!
//! A fingerprint is a SHA256 digest over a path's contents, used purely as a
//! cache key: same fingerprint means the path is treated as unchanged.
//!
//! Directory fingerprints hash the sorted `(relative path, file digest)` pairs
//! of every regular file in the tree, so they react to added, removed, renamed
//! and edited files but never to listing order, permissions or mtimes.

use crate::error::{NavoError, NavoResult};
use crate::state::{keys, StateFile};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Fingerprint recorded for a path that does not exist
pub const ABSENT: &str = "absent";

/// Compute the fingerprint of a file or directory tree.
///
/// Hashing reads the whole tree, so this runs on the blocking pool.
pub async fn fingerprint(path: &Path) -> NavoResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || fingerprint_sync(&path))
        .await
        .map_err(|e| NavoError::Internal(format!("fingerprint task failed: {}", e)))?
}

/// Blocking variant of [`fingerprint`]
pub fn fingerprint_sync(path: &Path) -> NavoResult<String> {
    if !path.exists() {
        return Ok(ABSENT.to_string());
    }

    if path.is_dir() {
        hash_directory(path)
    } else {
        hash_file(path)
    }
}

fn hash_file(path: &Path) -> NavoResult<String> {
    let contents = fs::read(path)
        .map_err(|e| NavoError::io(format!("reading {}", path.display()), e))?;
    Ok(hex::encode(Sha256::digest(&contents)))
}

fn hash_directory(root: &Path) -> NavoResult<String> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.map_err(|e| {
            let context = format!("walking {}", root.display());
            match e.into_io_error() {
                Some(source) => NavoError::io(context, source),
                None => NavoError::Internal(context),
            }
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| NavoError::Internal(e.to_string()))?
            .to_string_lossy()
            .replace('\\', "/");
        entries.push((relative, hash_file(entry.path())?));
    }

    entries.sort();

    let mut hasher = Sha256::new();
    for (relative, digest) in &entries {
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update(digest.as_bytes());
        hasher.update([b'\n']);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check-and-record: report whether `path` differs from the fingerprint
/// recorded in `state`, recording the current one when it does.
///
/// Calling this twice for an unchanged path returns `true` then `false`.
pub async fn has_changed(state: &StateFile, path: &Path) -> NavoResult<bool> {
    let current = fingerprint(path).await?;
    let key = path.to_string_lossy().to_string();

    // Compare and record under one lock so concurrent callers see one winner
    state
        .modify(|map| {
            let files = map
                .entry(keys::FILES.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            let files = files.as_object_mut().ok_or_else(|| NavoError::StateCorrupt {
                path: state.path().to_path_buf(),
                reason: format!("'{}' is not a mapping", keys::FILES),
            })?;

            let old = files.get(&key).and_then(Value::as_str).map(str::to_string);
            match old.as_deref() {
                Some(old) if old == current => Ok(false),
                old => {
                    match old {
                        Some(old) => debug!(
                            "Previous hash recorded for {} ({}) does not match current hash ({})",
                            key, old, current
                        ),
                        None => debug!("No previous hash recorded for {}", key),
                    }
                    files.insert(key.clone(), Value::String(current.clone()));
                    Ok(true)
                }
            }
        })
        .await
}

/// Drop the recorded fingerprint for `path`, so the next check reports a change
pub async fn forget(state: &StateFile, path: &Path) -> NavoResult<()> {
    let key = path.to_string_lossy().to_string();
    state
        .modify(|map| {
            if let Some(files) = map.get_mut(keys::FILES).and_then(Value::as_object_mut) {
                files.remove(&key);
            }
            Ok(())
        })
        .await
}
