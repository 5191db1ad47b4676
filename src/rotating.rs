//! Lazily opened, bucket-rotated output file.

use chrono::NaiveDateTime;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

use crate::bucket::{self, TimeBucket};
use crate::error::{AccessLogError, Result};

struct OpenBucket {
    bucket: TimeBucket,
    path: PathBuf,
    file: File,
}

/// Holds at most one open append handle, always for the bucket of the most recent
/// `acquire`.
///
/// Not synchronised on its own; [`crate::AccessLogWriter`] owns it behind a mutex.
pub struct RotatingFile {
    root: PathBuf,
    current: Option<OpenBucket>,
    opens: u64,
}

impl RotatingFile {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            current: None,
            opens: 0,
        }
    }

    /// Bucket of the currently open handle, if any.
    pub fn current_bucket(&self) -> Option<TimeBucket> {
        self.current.as_ref().map(|open| open.bucket)
    }

    /// Number of files opened over this handle's lifetime.
    pub fn opens(&self) -> u64 {
        self.opens
    }

    /// Returns a handle open for append on the file of `bucket(now)`.
    ///
    /// Reuses the open handle when the bucket is unchanged. Otherwise the stale
    /// handle is dropped and the new bucket's file is opened, creating its day
    /// directory as needed. Only bucket equality counts: a clock that moves
    /// backwards rotates to the earlier bucket's file.
    pub fn acquire(&mut self, now: &NaiveDateTime) -> Result<&mut File> {
        let wanted = bucket::bucket(now);

        // Taking the handle drops a stale one before touching the file system, so a
        // failed open never leaves it in place.
        match self.current.take() {
            Some(open) if open.bucket == wanted => return Ok(&mut self.current.insert(open).file),
            Some(stale) => {
                debug!(bucket = %stale.bucket, path = %stale.path.display(), "Closing stale log file");
            }
            None => {}
        }

        let path = bucket::destination(now).path_under(&self.root);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| AccessLogError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AccessLogError::Open {
                path: path.clone(),
                source,
            })?;

        self.opens += 1;
        debug!(bucket = %wanted, path = %path.display(), "Opened log file");
        let open = self.current.insert(OpenBucket {
            bucket: wanted,
            path,
            file,
        });
        Ok(&mut open.file)
    }

    /// Appends `line` to the file for `bucket(now)` in a single write call.
    ///
    /// A failed write discards the handle; the next call reopens it.
    pub fn append(&mut self, now: &NaiveDateTime, line: &str) -> Result<()> {
        let file = self.acquire(now)?;
        if let Err(source) = file.write_all(line.as_bytes()) {
            let path = self
                .current
                .take()
                .map(|open| open.path)
                .unwrap_or_else(|| self.root.clone());
            return Err(AccessLogError::Write { path, source });
        }
        Ok(())
    }

    /// Closes the open handle, if any.
    pub fn close(&mut self) {
        self.current = None;
    }
}
