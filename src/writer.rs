//! Serialized access to the rotating audit file.

use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::error::Result;
use crate::rotating::RotatingFile;

/// Funnels every audit line through one lock so bucket rotation and the append of a
/// complete line are atomic with respect to other requests.
///
/// Construct one per log root and share it (usually via `Arc`) with every
/// [`crate::AccessLogLayer`] that should write there.
pub struct AccessLogWriter {
    root: PathBuf,
    state: Mutex<RotatingFile>,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl AccessLogWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state: Mutex::new(RotatingFile::new(root.clone())),
            root,
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Appends `line` to the bucket file for `now`. Best effort: failures are counted
    /// in [`dropped`](Self::dropped) and logged, never returned.
    pub fn write(&self, now: &NaiveDateTime, line: &str) {
        if let Err(e) = self.try_write(now, line) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Dropping access log line");
        }
    }

    /// Like [`write`](Self::write) but hands the error back to the caller.
    pub fn try_write(&self, now: &NaiveDateTime, line: &str) -> Result<()> {
        self.lock().append(now, line)?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Lines successfully appended.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Lines lost to file-system errors.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Files opened so far, across all rotations.
    pub fn opens(&self) -> u64 {
        self.lock().opens()
    }

    fn lock(&self) -> MutexGuard<'_, RotatingFile> {
        self.state.lock().unwrap_or_else(|poisoned| {
            // A panic mid-append may have left a partial line; start the next one on
            // a fresh handle.
            let mut guard = poisoned.into_inner();
            guard.close();
            self.state.clear_poison();
            guard
        })
    }
}

impl std::fmt::Debug for AccessLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLogWriter")
            .field("root", &self.root)
            .field("written", &self.written())
            .field("dropped", &self.dropped())
            .finish()
    }
}
