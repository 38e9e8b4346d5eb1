//! Ready-made sink that forwards records to `tracing`.
//!
//! This module provides [`TracingSink`], which emits every completed request as a
//! `tracing` event at the matching level. It serves as both a functional sink and an
//! example of how to implement [`LogSink`].

use serde_json::Value;
use tracing::{error, info, warn};

use crate::{LogRecord, LogSink};

/// [`LogSink`] implementation backed by the `tracing` macros.
///
/// The most useful fields (correlation id, method, URL, status, timing) are logged as
/// structured fields; the complete record is attached as a JSON string under `record`.
///
/// # Examples
///
/// ```rust
/// use reqlog::{RequestLoggerConfig, RequestLoggerLayer, TracingSink};
///
/// let layer = RequestLoggerLayer::new(RequestLoggerConfig::default(), TracingSink)
///     .expect("default configuration is valid");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

struct Summary<'a> {
    req_id: &'a str,
    method: &'a str,
    url: &'a str,
    status: Option<u16>,
    response_time: f64,
}

fn text<'a>(record: &'a LogRecord, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or("-")
}

impl<'a> Summary<'a> {
    fn of(record: &'a LogRecord) -> Self {
        Self {
            req_id: record.request_id().unwrap_or("-"),
            method: text(record, "method"),
            url: text(record, "url"),
            status: record.status_code(),
            response_time: record.response_time().unwrap_or_default(),
        }
    }
}

impl LogSink for TracingSink {
    fn info(&self, record: LogRecord) {
        let s = Summary::of(&record);
        info!(
            req_id = s.req_id,
            method = s.method,
            url = s.url,
            status = s.status,
            response_time_ms = s.response_time,
            record = %record,
            "Request completed"
        );
    }

    fn warn(&self, record: LogRecord) {
        let s = Summary::of(&record);
        warn!(
            req_id = s.req_id,
            method = s.method,
            url = s.url,
            status = s.status,
            response_time_ms = s.response_time,
            record = %record,
            "Request completed with client error"
        );
    }

    fn error(&self, record: LogRecord) {
        let s = Summary::of(&record);
        error!(
            req_id = s.req_id,
            method = s.method,
            url = s.url,
            status = s.status,
            response_time_ms = s.response_time,
            record = %record,
            "Request completed with server error"
        );
    }
}
