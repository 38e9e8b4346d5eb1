//! # reqlog
//!
//! An Axum middleware that emits exactly one structured log record per completed request,
//! at a severity derived from the response status.
//!
//! ## Features
//!
//! - **Correlation ids**: every request gets a time-ordered UUID, attached as a
//!   [`RequestId`] extension and included in its record
//! - **Deferred capture**: the record is built when the response completes, so it carries
//!   the final status and the full response time
//! - **Exactly once**: whether the body finishes, is dropped mid-stream, or the request
//!   is cancelled before a response exists, one record is emitted
//! - **Status-driven severity**: `5xx` → `error`, `4xx` → `warn`, everything else → `info`
//! - **Handler enrichment**: handlers can add entries through the [`RequestLogs`] and
//!   [`ResponseLogs`] extensions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use reqlog::{RequestLoggerConfig, RequestLoggerLayer, TracingSink};
//!
//! async fn hello() -> &'static str {
//!     "Hello, World!"
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     tracing_subscriber::fmt::init();
//!
//!     let config = RequestLoggerConfig {
//!         headers: vec!["x-request-source".into()],
//!     };
//!     let layer = RequestLoggerLayer::new(config, TracingSink)?;
//!
//!     let app = Router::new().route("/hello", get(hello)).layer(layer);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Sinks
//!
//! Implement the [`LogSink`] trait to route records anywhere:
//!
//! ```rust
//! use reqlog::{LogRecord, LogSink};
//!
//! #[derive(Debug)]
//! struct Json;
//!
//! impl LogSink for Json {
//!     fn info(&self, record: LogRecord) {
//!         println!(r#"{{"level":"info","record":{record}}}"#);
//!     }
//!
//!     fn warn(&self, record: LogRecord) {
//!         println!(r#"{{"level":"warn","record":{record}}}"#);
//!     }
//!
//!     fn error(&self, record: LogRecord) {
//!         println!(r#"{{"level":"error","record":{record}}}"#);
//!     }
//! }
//! ```
//!
//! ## Record fields
//!
//! `req_id`, `statusCode`, `method`, `url`, `originalUrl`, `ip`, `response_time`
//! (milliseconds, fractional), `http_version`, `req_headers` (`referer`, `user-agent` and
//! any configured extras), `req_query`, `path`, `logs` and `res_logs`. The client `ip` is
//! taken from [`ConnectInfo`](axum::extract::ConnectInfo), so serve the app with
//! `into_make_service_with_connect_info::<SocketAddr>()` to populate it.

use axum::{body::Body, extract::Request, response::Response};
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::{debug, instrument};

pub mod config;
pub use config::{ConfigError, RequestLoggerConfig};
use config::ValidatedConfig;

pub mod types;
pub use types::{
    Completion, CompletionSignal, Fields, LogMap, LogRecord, RequestId, RequestLogs,
    ResponseLogs, Severity,
};

pub mod extract;
use extract::RequestSnapshot;

pub mod id;
pub use id::assign_request_id;

pub mod sink;
pub use sink::{AttachedSink, FnSink, FnSinkBuilder, LogSink};

pub mod tracing_sink;
pub use tracing_sink::TracingSink;

mod completion;
use completion::{CompletionBody, CompletionGate, GateGuard, Pending};

/// Tower layer for the request logging middleware.
///
/// This is the main entry point. It implements the Tower [`Layer`] trait and can be used
/// with Axum's layering system. Construction validates the configuration; once a layer
/// exists, nothing it does can fail a request.
///
/// # Examples
///
/// ```rust
/// use reqlog::{FnSink, RequestLoggerConfig, RequestLoggerLayer};
/// use axum::{routing::get, Router};
///
/// # async fn hello() -> &'static str { "Hello" }
/// # fn main() -> Result<(), reqlog::ConfigError> {
/// let sink = FnSink::builder()
///     .info(|record| println!("{record}"))
///     .warn(|record| println!("{record}"))
///     .error(|record| eprintln!("{record}"))
///     .build()?;
/// let layer = RequestLoggerLayer::new(RequestLoggerConfig::default(), sink)?;
///
/// let app: Router = Router::new().route("/hello", get(hello)).layer(layer);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RequestLoggerLayer {
    config: ValidatedConfig,
    sink: Arc<dyn LogSink>,
}

impl RequestLoggerLayer {
    /// Create a new request logger layer emitting to `sink`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidHeader`] if a configured header name is not a valid HTTP
    /// header name.
    pub fn new<S: LogSink>(config: RequestLoggerConfig, sink: S) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        debug!(extra_headers = ?config.headers, "Request logger configured");
        Ok(Self {
            config,
            sink: Arc::new(sink),
        })
    }
}

impl std::fmt::Debug for RequestLoggerLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLoggerLayer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService {
            inner,
            config: self.config.clone(),
            sink: self.sink.clone(),
        }
    }
}

/// Tower service implementation for the request logging middleware.
///
/// Users typically don't interact with this type directly - it's created by
/// [`RequestLoggerLayer`].
#[derive(Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    config: ValidatedConfig,
    sink: Arc<dyn LogSink>,
}

impl<S> Service<Request> for RequestLoggerService<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
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
        let started = Instant::now();
        let request_id = assign_request_id(&mut request);

        let request_logs = RequestLogs::default();
        let response_logs = ResponseLogs::default();
        {
            let extensions = request.extensions_mut();
            extensions.insert(request_logs.clone());
            extensions.insert(response_logs.clone());
            extensions.insert(AttachedSink(self.sink.clone()));
        }

        let snapshot = RequestSnapshot::capture(
            &request,
            request_id,
            self.config.headers.clone(),
            request_logs,
            response_logs.clone(),
        );
        debug!(
            request_id = %request_id,
            method = %snapshot.method,
            uri = %snapshot.uri,
            "Request received"
        );

        let gate = CompletionGate::new(Pending {
            snapshot,
            started,
            status: None,
            sink: self.sink.clone(),
        });
        let guard = GateGuard::new(gate.clone());

        let future = self.inner.call(request);

        Box::pin(async move {
            let mut response = future.await?;

            gate.record_status(response.status());
            if let Some(handler_logs) = response.extensions_mut().remove::<ResponseLogs>() {
                response_logs.extend(&handler_logs);
            }

            guard.disarm();
            Ok(response.map(|body| Body::new(CompletionBody::new(body, gate))))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        convert::Infallible,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tower::{service_fn, ServiceExt};

    type Emitted = Arc<Mutex<Vec<(Severity, LogRecord)>>>;

    fn recording_layer(config: RequestLoggerConfig) -> (RequestLoggerLayer, Emitted) {
        let emitted: Emitted = Arc::default();
        let (i, w, e) = (emitted.clone(), emitted.clone(), emitted.clone());
        let sink = FnSink::builder()
            .info(move |r| i.lock().unwrap().push((Severity::Info, r)))
            .warn(move |r| w.lock().unwrap().push((Severity::Warn, r)))
            .error(move |r| e.lock().unwrap().push((Severity::Error, r)))
            .build()
            .unwrap();
        (RequestLoggerLayer::new(config, sink).unwrap(), emitted)
    }

    #[test]
    fn test_invalid_header_fails_construction() {
        let config = RequestLoggerConfig {
            headers: vec!["x-ok".into(), "not ok".into()],
        };
        assert!(matches!(
            RequestLoggerLayer::new(config, TracingSink),
            Err(ConfigError::InvalidHeader { .. })
        ));
    }

    #[tokio::test]
    async fn test_extensions_attached_for_handlers() {
        let (layer, emitted) = recording_layer(RequestLoggerConfig::default());
        let service = layer.layer(service_fn(|request: Request| async move {
            assert!(request.extensions().get::<RequestId>().is_some());
            assert!(request.extensions().get::<AttachedSink>().is_some());
            if let Some(logs) = request.extensions().get::<RequestLogs>() {
                logs.insert("handler", "seen");
            }
            Ok::<_, Infallible>(Response::new(Body::from("ok")))
        }));

        let request = axum::http::Request::builder().uri("/ext").body(Body::empty()).unwrap();
        let response = service.oneshot(request).await.unwrap();
        drop(response);

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(
            emitted[0].1.get("logs"),
            Some(&serde_json::json!({ "handler": "seen" }))
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_response_emits_once_without_status() {
        let (layer, emitted) = recording_layer(RequestLoggerConfig::default());
        let service = layer.layer(service_fn(|_request: Request| async move {
            std::future::pending::<()>().await;
            Ok::<_, Infallible>(Response::new(Body::empty()))
        }));

        let request = axum::http::Request::builder().uri("/hang").body(Body::empty()).unwrap();
        let outcome =
            tokio::time::timeout(Duration::from_millis(20), service.oneshot(request)).await;
        assert!(outcome.is_err());

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, Severity::Info);
        assert_eq!(emitted[0].1.status_code(), None);
        assert_eq!(emitted[0].1.get("path"), Some(&serde_json::json!("/hang")));
    }

    #[tokio::test]
    async fn test_inner_error_emits_close_and_propagates() {
        #[derive(Debug)]
        struct Boom;

        let (layer, emitted) = recording_layer(RequestLoggerConfig::default());
        let service = layer.layer(service_fn(|_request: Request| async move {
            Err::<Response, _>(Boom)
        }));

        let request = axum::http::Request::builder().uri("/boom").body(Body::empty()).unwrap();
        assert!(service.oneshot(request).await.is_err());
        assert_eq!(emitted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_response_logs_from_response_extensions_are_merged() {
        let (layer, emitted) = recording_layer(RequestLoggerConfig::default());
        let service = layer.layer(service_fn(|_request: Request| async move {
            let logs = ResponseLogs::default();
            logs.insert("cache", "miss");
            let mut response = Response::new(Body::from("ok"));
            response.extensions_mut().insert(logs);
            Ok::<_, Infallible>(response)
        }));

        let request = axum::http::Request::builder().uri("/merge").body(Body::empty()).unwrap();
        drop(service.oneshot(request).await.unwrap());

        let emitted = emitted.lock().unwrap();
        assert_eq!(
            emitted[0].1.get("res_logs"),
            Some(&serde_json::json!({ "cache": "miss" }))
        );
    }
}
