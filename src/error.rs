//! Errors raised while writing audit lines.

use std::path::PathBuf;

/// Failure to place an audit line on disk.
///
/// These never reach the request path: [`crate::AccessLogWriter::write`] drops the
/// line and counts it instead.
#[derive(Debug, thiserror::Error)]
pub enum AccessLogError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to append to log file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AccessLogError>;
