//! Per-suite log files
//!
//! Console output goes through `tracing` (filtered by verbosity), but each
//! suite also records everything, down to debug level and including all
//! in-container output, in `.navo/suites/<name>/log.log` so a failure can be
//! inspected after the fact. The file is truncated each time the suite is
//! loaded.

use crate::error::{NavoError, NavoResult};
use crate::orchestration::{OutputChunk, StreamKind};
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info, warn, Level};

/// Log sink for one suite, mirroring messages to `tracing` and a file
pub struct SuiteLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl SuiteLog {
    /// Open (and truncate) the log file at `path`
    pub fn open(path: impl Into<PathBuf>) -> NavoResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| NavoError::io(format!("creating directory {}", parent.display()), e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| NavoError::io(format!("opening log file {}", path.display()), e))?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Path of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        self.log(Level::DEBUG, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::INFO, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.log(Level::WARN, message.as_ref());
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::ERROR, message.as_ref());
    }

    /// Major lifecycle event (creating, converging, ...)
    pub fn event(&self, message: impl AsRef<str>) {
        self.log(Level::INFO, &format!("=====> {}", message.as_ref()));
    }

    /// Record a line of in-container output at `level`
    pub fn output(&self, level: Level, chunk: &OutputChunk) {
        match chunk.stream {
            StreamKind::Stdout => self.log(level, &chunk.line),
            StreamKind::Stderr => self.log(level, &format!("[stderr] {}", chunk.line)),
        }
    }

    /// Write a message to the file and emit it as a tracing event
    pub fn log(&self, level: Level, message: &str) {
        let message = message.trim_end_matches('\n');

        match level {
            Level::ERROR => error!("{}", message),
            Level::WARN => warn!("{}", message),
            Level::INFO => info!("{}", message),
            _ => debug!("{}", message),
        }

        self.append(level, message);
    }

    /// Silently drops lines on IO failure; the log must never break a run
    fn append(&self, level: Level, message: &str) {
        let mut slot = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = slot.as_mut() else {
            return;
        };

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        for line in message.lines() {
            if writeln!(file, "{} {:>5} {}", timestamp, level, line).is_err() {
                *slot = None;
                return;
            }
        }
    }
}
