use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use bytes::Bytes;
use reqlog::*;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{net::TcpListener, time::sleep};
use tracing::{info, Level};

/// Sink that forwards to `tracing` and also keeps per-severity counters for `/stats`
#[derive(Debug, Clone, Default)]
struct DemoSink {
    counts: Arc<Mutex<HashMap<Severity, u64>>>,
}

impl DemoSink {
    fn count(&self, severity: Severity) {
        *self.counts.lock().unwrap().entry(severity).or_insert(0) += 1;
    }

    fn snapshot(&self) -> HashMap<String, u64> {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .map(|(severity, count)| (severity.to_string(), *count))
            .collect()
    }
}

impl LogSink for DemoSink {
    fn info(&self, record: LogRecord) {
        self.count(Severity::Info);
        TracingSink.info(record);
    }

    fn warn(&self, record: LogRecord) {
        self.count(Severity::Warn);
        TracingSink.warn(record);
    }

    fn error(&self, record: LogRecord) {
        self.count(Severity::Error);
        TracingSink.error(record);
    }
}

async fn hello_handler(Extension(logs): Extension<RequestLogs>) -> impl IntoResponse {
    sleep(Duration::from_millis(100)).await; // Simulate some work
    logs.insert("greeting", "hello");
    "Hello, World!"
}

async fn echo_handler(body: Bytes) -> impl IntoResponse {
    sleep(Duration::from_millis(50)).await; // Simulate some work
    format!("Echo: {}", String::from_utf8_lossy(&body))
}

async fn fail_handler(Extension(logs): Extension<ResponseLogs>) -> impl IntoResponse {
    logs.insert("err", "upstream timed out");
    (StatusCode::BAD_GATEWAY, "upstream unavailable")
}

async fn streaming_handler() -> impl IntoResponse {
    use futures::stream;
    use tokio::time::interval;

    let stream = stream::unfold(0u32, |count| async move {
        if count >= 5 {
            None
        } else {
            let mut interval = interval(Duration::from_millis(200));
            interval.tick().await;
            Some((
                Ok::<_, std::convert::Infallible>(Bytes::from(format!("chunk-{count}\n"))),
                count + 1,
            ))
        }
    });

    Response::builder()
        .header("content-type", "text/plain")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn stats_handler(sink: DemoSink) -> impl IntoResponse {
    Json(serde_json::json!({ "records_by_severity": sink.snapshot() }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    info!("Starting request logger demo server");

    let sink = DemoSink::default();
    let stats_sink = sink.clone();

    let config = RequestLoggerConfig {
        headers: vec!["x-request-source".into()],
    };

    let app = Router::new()
        .route("/hello", get(hello_handler))
        .route("/echo", post(echo_handler))
        .route("/fail", get(fail_handler))
        .route("/streaming", get(streaming_handler))
        .route("/stats", get(move || stats_handler(stats_sink.clone())))
        .layer(RequestLoggerLayer::new(config, sink)?);

    info!("Demo server endpoints:");
    info!("  GET  /hello      - Simple greeting (info)");
    info!("  POST /echo       - Echo request body (info)");
    info!("  GET  /fail       - Upstream failure (error)");
    info!("  GET  /streaming  - Streaming response, try Ctrl-C midway (close)");
    info!("  GET  /stats      - Records emitted so far, by severity");
    info!("");
    info!("Try these commands:");
    info!("  curl http://localhost:3000/hello?name=tobi");
    info!("  curl -H 'x-request-source: cli' -X POST -d 'Hello from client' http://localhost:3000/echo");
    info!("  curl http://localhost:3000/fail");
    info!("  curl http://localhost:3000/streaming");
    info!("  curl http://localhost:3000/stats");

    let listener = TcpListener::bind("0.0.0.0:3000").await?;
    info!("Demo server listening on http://localhost:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
