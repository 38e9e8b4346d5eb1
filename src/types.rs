//! Data types shared between the middleware, its extractors and log sinks.
//!
//! This module contains the emitted [`LogRecord`], the [`Severity`] it is emitted at, and
//! the request extensions the middleware attaches for downstream handlers.

use axum::http::StatusCode;
use serde::Serialize;
use serde_json::{Map, Value};
use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};
use uuid::Uuid;

/// A partial contribution to a [`LogRecord`], as produced by a single extractor.
pub type Fields = Map<String, Value>;

/// Severity a record is emitted at, derived from the final response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    /// Map a status code to a severity.
    ///
    /// `>= 500` is an error, `400..500` a warning, and everything else (including a
    /// request that closed before any status was recorded) is informational.
    ///
    /// ```rust
    /// use reqlog::Severity;
    ///
    /// assert_eq!(Severity::from_status(Some(503)), Severity::Error);
    /// assert_eq!(Severity::from_status(Some(404)), Severity::Warn);
    /// assert_eq!(Severity::from_status(Some(204)), Severity::Info);
    /// assert_eq!(Severity::from_status(None), Severity::Info);
    /// ```
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(code) if code >= 500 => Severity::Error,
            Some(code) if code >= 400 => Severity::Warn,
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

/// One structured record per completed request.
///
/// The record is a JSON object assembled by folding every extractor's [`Fields`] into a
/// single map, later extractors winning on key collisions. It is built once, handed to
/// a [`LogSink`](crate::LogSink) by value, and never retained by the middleware.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LogRecord(Fields);

impl LogRecord {
    /// Fold partial field maps into a record. Later maps overwrite earlier keys.
    pub fn from_parts<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = Fields>,
    {
        let fields = parts.into_iter().fold(Map::new(), |mut acc, part| {
            acc.extend(part);
            acc
        });
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// The correlation id, `req_id`.
    pub fn request_id(&self) -> Option<&str> {
        self.0.get("req_id").and_then(Value::as_str)
    }

    /// The final status code, `statusCode`, if one was recorded before completion.
    pub fn status_code(&self) -> Option<u16> {
        self.0
            .get("statusCode")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
    }

    /// Elapsed milliseconds between arrival and completion, `response_time`.
    pub fn response_time(&self) -> Option<f64> {
        self.0.get("response_time").and_then(Value::as_f64)
    }

    /// A single header from the `req_headers` sub-map.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.0
            .get("req_headers")
            .and_then(|headers| headers.get(name))
            .and_then(Value::as_str)
    }

    /// The severity this record is emitted at.
    pub fn severity(&self) -> Severity {
        Severity::from_status(self.status_code())
    }

    /// Borrow the underlying field map.
    pub fn as_map(&self) -> &Fields {
        &self.0
    }

    pub fn into_map(self) -> Fields {
        self.0
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

/// Correlation id attached to every request as an extension.
///
/// Handlers can read it with `Extension<RequestId>` to tag their own logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

/// Shared, free-form key/value map that handlers can enrich while a request is in flight.
#[derive(Debug, Clone, Default)]
pub struct LogMap(Arc<Mutex<Fields>>);

impl LogMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn extend(&self, other: &LogMap) {
        if Arc::ptr_eq(&self.0, &other.0) {
            return;
        }
        let entries = other.snapshot();
        self.lock().extend(entries);
    }

    /// Whether no entry has been inserted yet.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current entries.
    pub fn snapshot(&self) -> Fields {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Fields> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Request-side auxiliary logs, emitted under `logs`.
///
/// ```rust
/// use axum::Extension;
/// use reqlog::RequestLogs;
///
/// async fn handler(Extension(logs): Extension<RequestLogs>) -> &'static str {
///     logs.insert("user", "tobi");
///     "ok"
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestLogs(pub LogMap);

impl std::ops::Deref for RequestLogs {
    type Target = LogMap;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Response-side auxiliary logs, emitted under `res_logs`.
///
/// Available to handlers as a request extension. A `ResponseLogs` placed into the
/// response extensions is merged into the same map once the response is produced.
#[derive(Debug, Clone, Default)]
pub struct ResponseLogs(pub LogMap);

impl std::ops::Deref for ResponseLogs {
    type Target = LogMap;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Completion signals racing to fire a request's gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionSignal {
    /// The response body was fully sent.
    Finish,
    /// The exchange ended before the body finished: dropped body, cancelled future or
    /// inner service error.
    Close,
}

/// What is known about the response at the moment the gate fires.
#[derive(Debug, Clone)]
pub struct Completion {
    pub signal: CompletionSignal,
    pub status: Option<StatusCode>,
    pub elapsed: std::time::Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_boundaries() {
        assert_eq!(Severity::from_status(Some(0)), Severity::Info);
        assert_eq!(Severity::from_status(Some(200)), Severity::Info);
        assert_eq!(Severity::from_status(Some(399)), Severity::Info);
        assert_eq!(Severity::from_status(Some(400)), Severity::Warn);
        assert_eq!(Severity::from_status(Some(499)), Severity::Warn);
        assert_eq!(Severity::from_status(Some(500)), Severity::Error);
        assert_eq!(Severity::from_status(Some(u16::MAX)), Severity::Error);
        assert_eq!(Severity::from_status(None), Severity::Info);
    }

    #[test]
    fn test_record_fold_later_wins() {
        let mut first = Fields::new();
        first.insert("a".into(), json!(1));
        first.insert("b".into(), json!(1));
        let mut second = Fields::new();
        second.insert("b".into(), json!(2));

        let record = LogRecord::from_parts([first, second]);
        assert_eq!(record.get("a"), Some(&json!(1)));
        assert_eq!(record.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_record_accessors() {
        let record = LogRecord::from_parts([json!({
            "req_id": "abc",
            "statusCode": 404,
            "response_time": 1.5,
            "req_headers": { "user-agent": "curl" },
        })
        .as_object()
        .cloned()
        .unwrap()]);

        assert_eq!(record.request_id(), Some("abc"));
        assert_eq!(record.status_code(), Some(404));
        assert_eq!(record.response_time(), Some(1.5));
        assert_eq!(record.header("user-agent"), Some("curl"));
        assert_eq!(record.header("referer"), None);
        assert_eq!(record.severity(), Severity::Warn);
        assert_eq!(record.as_map().len(), 4);
        assert!(record.as_map().contains_key("req_headers"));
        let reparsed: Value = serde_json::from_str(&record.to_string()).unwrap();
        assert_eq!(reparsed, Value::Object(record.clone().into_map()));
    }

    #[test]
    fn test_log_map_shared_between_clones() {
        let logs = RequestLogs::default();
        let handle = logs.clone();
        assert!(logs.is_empty());
        handle.insert("test.req.log", "testlog");
        assert!(!logs.is_empty());
        assert_eq!(logs.snapshot().get("test.req.log"), Some(&json!("testlog")));
    }

    #[test]
    fn test_log_map_extend_self_is_noop() {
        let logs = LogMap::new();
        logs.insert("k", 1);
        logs.extend(&logs.clone());
        assert_eq!(logs.snapshot().len(), 1);
    }
}
