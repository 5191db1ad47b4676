//! # Bucketlog
//!
//! An Axum middleware that writes one human-readable audit line per request, including
//! the captured request and response bodies, into log files bucketed by wall-clock time.
//!
//! Lines go to `<root>/<YYYY-MM-DD>/log_<YYYY-MM-DD_HH-MM>.log`, one file per
//! ten-minute bucket. A single [`AccessLogWriter`] serialises every append, so lines
//! from concurrent requests never interleave.
//!
//! ```text
//! 2024-03-09 10:07:12.481 [books] [warn] status=404 method=GET route=/api/v2/books/:id ip=10.0.0.7 latency=1.2ms req= res={"error":"book not found"}
//! ```
//!
//! ## Features
//!
//! - **Transparent capture**: clients and handlers see byte-identical bodies
//! - **Bounded memory**: each direction is captured up to a configurable limit
//! - **Best effort**: a failing disk drops the line, never the request
//! - **Injectable writer**: independent writers per log root, easy to test
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use bucketlog::{AccessLogConfig, AccessLogLayer};
//! use std::net::SocketAddr;
//!
//! async fn list_books() -> &'static str {
//!     "[]"
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .route("/api/v1/books", get(list_books))
//!         .layer(AccessLogLayer::new(AccessLogConfig::from_env()));
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! Add the layer with [`Router::layer`](axum::Router::layer) so it runs after routing
//! and sees the matched route template. Serving with `ConnectInfo` gives it the client
//! address.

use axum::{
    body::Body,
    extract::{ConnectInfo, MatchedPath, Request},
    http::{Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::{
    net::SocketAddr,
    path::PathBuf,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tower::{Layer, Service};
use tracing::{debug, error, instrument, warn, Instrument};

pub mod body_wrapper;
use body_wrapper::{capture_body_prefix, create_body_capture_stream, CapturedBody};

pub mod bucket;
pub use bucket::{LogDestination, TimeBucket, BUCKET_WIDTH_MINUTES};

pub mod error;
pub use error::AccessLogError;

pub mod format;
pub use format::{module_from_route, Severity};

pub mod rotating;
pub use rotating::RotatingFile;

pub mod types;
pub use types::{AuditRecord, CapturedExchange};

pub mod writer;
pub use writer::AccessLogWriter;

/// Environment variable overriding [`AccessLogConfig::root`].
pub const ENV_LOG_DIR: &str = "ACCESS_LOG_DIR";
/// Environment variable overriding [`AccessLogConfig::max_body_bytes`].
pub const ENV_MAX_BODY_BYTES: &str = "ACCESS_LOG_MAX_BODY_BYTES";

/// Configuration for the access log middleware.
///
/// # Examples
///
/// ```rust
/// use bucketlog::AccessLogConfig;
///
/// // Default configuration: ./logs, 1 MiB captured per direction
/// let config = AccessLogConfig::default();
///
/// // Custom configuration
/// let config = AccessLogConfig {
///     root: "/var/log/books".into(),
///     max_body_bytes: 64 * 1024,
///     capture_request_body: true,
///     capture_response_body: false,
/// };
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct AccessLogConfig {
    /// Directory holding the per-day bucket directories
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Maximum number of bytes captured from each body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Whether to capture request bodies
    #[serde(default = "default_capture")]
    pub capture_request_body: bool,
    /// Whether to capture response bodies
    #[serde(default = "default_capture")]
    pub capture_response_body: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("logs")
}

fn default_max_body_bytes() -> usize {
    1 << 20
}

fn default_capture() -> bool {
    true
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            max_body_bytes: default_max_body_bytes(),
            capture_request_body: default_capture(),
            capture_response_body: default_capture(),
        }
    }
}

impl AccessLogConfig {
    /// Defaults overlaid with [`ENV_LOG_DIR`] and [`ENV_MAX_BODY_BYTES`].
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|dir| !dir.is_empty()) {
            config.root = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_MAX_BODY_BYTES) {
            match raw.trim().parse() {
                Ok(limit) => config.max_body_bytes = limit,
                Err(e) => warn!(value = %raw, error = %e, "Ignoring invalid {ENV_MAX_BODY_BYTES}"),
            }
        }
        config
    }
}

/// Tower layer for the access log middleware.
///
/// Every service produced by this layer shares one [`AccessLogWriter`], so install it
/// once for the whole router.
///
/// # Examples
///
/// ```rust,no_run
/// use bucketlog::{AccessLogConfig, AccessLogLayer, AccessLogWriter};
/// use axum::{routing::get, Router};
/// use std::sync::Arc;
///
/// # async fn get_book() -> &'static str { "{}" }
/// let config = AccessLogConfig::default();
/// let writer = Arc::new(AccessLogWriter::new(&config.root));
/// let layer = AccessLogLayer::with_writer(config, writer.clone());
///
/// let app: Router = Router::new()
///     .route("/api/v1/books/:id", get(get_book))
///     .layer(layer);
///
/// // `writer.dropped()` can be exported to monitoring
/// ```
#[derive(Clone, Debug)]
pub struct AccessLogLayer {
    config: AccessLogConfig,
    writer: Arc<AccessLogWriter>,
}

impl AccessLogLayer {
    /// Creates a layer with its own writer rooted at `config.root`.
    pub fn new(config: AccessLogConfig) -> Self {
        let writer = Arc::new(AccessLogWriter::new(config.root.clone()));
        Self { config, writer }
    }

    /// Creates a layer that appends through an existing writer.
    pub fn with_writer(config: AccessLogConfig, writer: Arc<AccessLogWriter>) -> Self {
        Self { config, writer }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            config: self.config.clone(),
            writer: self.writer.clone(),
        }
    }
}

/// Tower service implementation for the access log middleware.
///
/// Users typically don't interact with this type directly - it's created by
/// [`AccessLogLayer`].
#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    config: AccessLogConfig,
    writer: Arc<AccessLogWriter>,
}

/// Request metadata taken at entry, before the inner service runs.
struct Started {
    method: Method,
    route: String,
    client_addr: String,
    started_at: DateTime<Local>,
    start: Instant,
}

impl<S> Service<Request> for AccessLogService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future =
        Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    #[instrument(skip_all)]
    fn call(&mut self, mut request: Request) -> Self::Future {
        let started = Started {
            method: request.method().clone(),
            route: request
                .extensions()
                .get::<MatchedPath>()
                .map(|path| path.as_str().to_owned())
                .unwrap_or_default(),
            client_addr: client_addr(&request),
            started_at: Local::now(),
            start: Instant::now(),
        };
        debug!(method = %started.method, route = %started.route, "Starting request processing");

        let config = self.config.clone();
        let writer = self.writer.clone();

        // The ready service handles this request; a fresh clone takes its place
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        // Runs to completion even if the caller drops the response future
        let handle = tokio::spawn(
            async move {
                let request_body = if config.capture_request_body {
                    let body = std::mem::replace(request.body_mut(), Body::empty());
                    let (restored, captured) =
                        capture_body_prefix(body, config.max_body_bytes).await;
                    *request.body_mut() = restored;
                    captured
                } else {
                    Bytes::new()
                };

                let result = inner.call(request).await;
                let elapsed = started.start.elapsed();

                match result {
                    Ok(mut response) => {
                        let status = response.status();
                        debug!(status = %status, elapsed = ?elapsed, "Inner service response received");

                        let response_capture = if config.capture_response_body {
                            let body = std::mem::replace(response.body_mut(), Body::empty());
                            let (body_stream, capture_future) =
                                create_body_capture_stream(body, config.max_body_bytes);
                            *response.body_mut() = body_stream;
                            Some(capture_future)
                        } else {
                            None
                        };

                        // The body is still streaming to the client; write once it is done
                        tokio::spawn(
                            emit(writer, started, status, elapsed, request_body, response_capture)
                                .in_current_span(),
                        );

                        Ok(response)
                    }
                    Err(e) => {
                        error!(elapsed = ?elapsed, "Inner service failed; logging as 500");
                        emit(
                            writer,
                            started,
                            StatusCode::INTERNAL_SERVER_ERROR,
                            elapsed,
                            request_body,
                            None,
                        )
                        .await;
                        Err(e)
                    }
                }
            }
            .in_current_span(),
        );

        Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                Err(e) => {
                    // Only happens while the runtime shuts down, which drops this future too
                    error!(error = %e, "Access log task cancelled");
                    std::future::pending().await
                }
            }
        })
    }
}

/// Waits for the response capture, then formats and writes the audit line.
async fn emit(
    writer: Arc<AccessLogWriter>,
    started: Started,
    status: StatusCode,
    elapsed: Duration,
    request_body: Bytes,
    response_capture: Option<CapturedBody>,
) {
    let response_body = match response_capture {
        Some(capture_future) => capture_future.await,
        None => Bytes::new(),
    };

    let exchange = CapturedExchange {
        method: started.method,
        route: started.route,
        client_addr: started.client_addr,
        started_at: started.started_at,
        status,
        elapsed,
        request_body,
        response_body,
    };
    let record = AuditRecord::new(&exchange, Local::now());
    writer.write(&record.timestamp.naive_local(), &record.to_line());
}

/// Peer address from `ConnectInfo`, else the first `X-Forwarded-For` hop, else `-`.
fn client_addr(request: &Request) -> String {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return addr.ip().to_string();
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = AccessLogConfig::default();
        assert_eq!(config.root, PathBuf::from("logs"));
        assert_eq!(config.max_body_bytes, 1024 * 1024);
        assert!(config.capture_request_body);
        assert!(config.capture_response_body);
    }

    #[test]
    fn test_config_env_overlay() {
        let env = HashMap::from([
            (ENV_LOG_DIR, "/tmp/audit"),
            (ENV_MAX_BODY_BYTES, "4096"),
        ]);
        let config = AccessLogConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.root, PathBuf::from("/tmp/audit"));
        assert_eq!(config.max_body_bytes, 4096);
    }

    #[test]
    fn test_config_ignores_invalid_limit() {
        let config = AccessLogConfig::from_lookup(|key| {
            (key == ENV_MAX_BODY_BYTES).then(|| "lots".to_string())
        });
        assert_eq!(config.max_body_bytes, 1 << 20);
        assert_eq!(config.root, PathBuf::from("logs"));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: AccessLogConfig =
            serde_json::from_str(r#"{"root": "audit", "capture_response_body": false}"#).unwrap();
        assert_eq!(config.root, PathBuf::from("audit"));
        assert_eq!(config.max_body_bytes, 1 << 20);
        assert!(config.capture_request_body);
        assert!(!config.capture_response_body);
    }

    #[test]
    fn test_client_addr_sources() {
        let mut request = Request::new(Body::empty());
        assert_eq!(client_addr(&request), "-");

        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        assert_eq!(client_addr(&request), "203.0.113.9");

        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 53211))));
        assert_eq!(client_addr(&request), "192.168.1.20");
    }
}
