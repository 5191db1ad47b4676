//! Audit line formatting and request classification.

use axum::http::StatusCode;
use chrono::{DateTime, Local, TimeZone};
use std::fmt;

use crate::types::{AuditRecord, CapturedExchange};

/// Module used when no route template is available.
pub const UNKNOWN_MODULE: &str = "-";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Severity of an audit line, derived from the response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            500.. => Severity::Error,
            400..=499 => Severity::Warn,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical module of a route template.
///
/// `/api/v1/books/:id` gives `books`, `/health` gives `health`, and an empty route
/// gives [`UNKNOWN_MODULE`].
pub fn module_from_route(route: &str) -> &str {
    if route.is_empty() {
        return UNKNOWN_MODULE;
    }
    let mut parts = route.strip_prefix('/').unwrap_or(route).split('/');
    let first = parts.next().unwrap_or_default();
    let second = parts.next();
    let third = parts.next();

    match (second, third) {
        (Some(version), Some(module)) if first == "api" && version.starts_with('v') => module,
        _ if first.is_empty() => UNKNOWN_MODULE,
        _ => first,
    }
}

/// Local wall-clock time with millisecond precision.
pub fn format_timestamp<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Lossily decodes `body` and replaces line breaks with spaces so the entry stays on
/// one physical line.
pub fn flatten_newlines(body: &[u8]) -> String {
    String::from_utf8_lossy(body).replace(['\n', '\r'], " ")
}

impl AuditRecord {
    /// Builds the record for `exchange`, stamped with `now`.
    pub fn new(exchange: &CapturedExchange, now: DateTime<Local>) -> Self {
        let message = format!(
            "status={} method={} route={} ip={} latency={:?} req={} res={}",
            exchange.status.as_u16(),
            exchange.method,
            exchange.route,
            exchange.client_addr,
            exchange.elapsed,
            flatten_newlines(&exchange.request_body),
            flatten_newlines(&exchange.response_body),
        );
        Self {
            timestamp: now,
            module: module_from_route(&exchange.route).to_string(),
            severity: Severity::from_status(exchange.status),
            message,
        }
    }

    /// The newline-terminated line appended to the bucket file.
    pub fn to_line(&self) -> String {
        format!(
            "{} [{}] [{}] {}\n",
            format_timestamp(&self.timestamp),
            self.module,
            self.severity,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;
    use bytes::Bytes;
    use std::time::Duration;

    #[test]
    fn test_versioned_route_module() {
        assert_eq!(module_from_route("/api/v2/books/:id"), "books");
        assert_eq!(module_from_route("/api/v1/books"), "books");
        assert_eq!(module_from_route("api/v1/authors/:id/books"), "authors");
    }

    #[test]
    fn test_unversioned_route_module() {
        assert_eq!(module_from_route("/health"), "health");
        assert_eq!(module_from_route("/api/books"), "api");
        assert_eq!(module_from_route("/api/internal/books"), "api");
        assert_eq!(module_from_route("/docs/v1/*any"), "docs");
    }

    #[test]
    fn test_empty_route_module() {
        assert_eq!(module_from_route(""), "-");
        assert_eq!(module_from_route("/"), "-");
    }

    #[test]
    fn test_severity_from_status() {
        assert_eq!(Severity::from_status(StatusCode::OK), Severity::Info);
        assert_eq!(Severity::from_status(StatusCode::CREATED), Severity::Info);
        assert_eq!(Severity::from_status(StatusCode::FOUND), Severity::Info);
        assert_eq!(Severity::from_status(StatusCode::NOT_FOUND), Severity::Warn);
        assert_eq!(Severity::from_status(StatusCode::CONFLICT), Severity::Warn);
        assert_eq!(
            Severity::from_status(StatusCode::INTERNAL_SERVER_ERROR),
            Severity::Error
        );
        assert_eq!(
            Severity::from_status(StatusCode::SERVICE_UNAVAILABLE),
            Severity::Error
        );
    }

    #[test]
    fn test_timestamp_has_millis() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 10, 7, 5).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(format_timestamp(&at), "2024-03-09 10:07:05.042");
    }

    #[test]
    fn test_line_is_single_physical_line() {
        let started_at = Local.with_ymd_and_hms(2024, 3, 9, 10, 7, 0).unwrap();
        let exchange = CapturedExchange {
            method: Method::GET,
            route: "/api/v2/books/:id".to_string(),
            client_addr: "10.0.0.7".to_string(),
            started_at,
            status: StatusCode::NOT_FOUND,
            elapsed: Duration::from_millis(3),
            request_body: Bytes::from_static(b""),
            response_body: Bytes::from_static(b"{\n  \"error\": \"not found\"\r\n}"),
        };

        let record = AuditRecord::new(&exchange, started_at);
        assert_eq!(record.module, "books");
        assert_eq!(record.severity, Severity::Warn);

        let line = record.to_line();
        assert_eq!(
            line,
            "2024-03-09 10:07:00.000 [books] [warn] status=404 method=GET \
             route=/api/v2/books/:id ip=10.0.0.7 latency=3ms req= \
             res={   \"error\": \"not found\"  }\n"
        );
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_created_post_is_info() {
        let now = Local::now();
        let exchange = CapturedExchange {
            method: Method::POST,
            route: "/api/v1/books".to_string(),
            client_addr: "-".to_string(),
            started_at: now,
            status: StatusCode::CREATED,
            elapsed: Duration::from_micros(1500),
            request_body: Bytes::from_static(b"{\"title\":\"Dune\"}"),
            response_body: Bytes::new(),
        };
        let record = AuditRecord::new(&exchange, now);
        assert_eq!(record.module, "books");
        assert_eq!(record.severity, Severity::Info);
        assert!(record.message.contains("latency=1.5ms"));
        assert!(record.message.contains("req={\"title\":\"Dune\"}"));
    }
}
