//! Data captured per request and the audit record built from it.

use axum::http::{Method, StatusCode};
use bytes::Bytes;
use chrono::{DateTime, Local};
use std::time::Duration;

use crate::format::Severity;

/// Everything the middleware captured about one exchange.
///
/// Built at request entry, completed once the response body finishes streaming,
/// and dropped after its line has been written.
#[derive(Debug, Clone)]
pub struct CapturedExchange {
    /// HTTP method (GET, POST, etc.)
    pub method: Method,
    /// Matched route template such as `/api/v1/books/:id`; empty when nothing matched
    pub route: String,
    /// Client address, or `-` when unknown
    pub client_addr: String,
    /// Wall-clock time the request entered the middleware
    pub started_at: DateTime<Local>,
    /// Final status code returned by the inner service
    pub status: StatusCode,
    /// Time from request entry until the inner service produced the response head
    pub elapsed: Duration,
    /// Inbound body, truncated to the capture limit
    pub request_body: Bytes,
    /// Outbound body, truncated to the capture limit
    pub response_body: Bytes,
}

/// One formatted audit entry. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub timestamp: DateTime<Local>,
    pub module: String,
    pub severity: Severity,
    pub message: String,
}
