//! Field extractors.
//!
//! Every extractor is a pure projection from the request snapshot taken on arrival and the
//! [`Completion`] state observed when the gate fires. Each returns its own partial
//! [`Fields`] map; [`build_record`] folds them in [`EXTRACTORS`] order, so a later
//! extractor wins if two ever produce the same key.

use axum::{
    extract::{ConnectInfo, OriginalUri, Request},
    http::{HeaderMap, HeaderName, Method, Uri, Version},
};
use serde_json::{Map, Value};
use std::{net::SocketAddr, sync::Arc};

use crate::types::{Completion, Fields, LogRecord, RequestId, RequestLogs, ResponseLogs};

/// Headers recorded for every request, before any configured extras.
pub const BASIC_HEADER_FIELDS: [HeaderName; 2] =
    [axum::http::header::REFERER, axum::http::header::USER_AGENT];

/// Request attributes captured on arrival, before the request moves downstream.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    pub request_id: RequestId,
    pub method: Method,
    pub uri: Uri,
    pub original_uri: Option<Uri>,
    pub version: Version,
    pub headers: HeaderMap,
    pub client_addr: Option<SocketAddr>,
    pub extra_headers: Arc<[HeaderName]>,
    pub request_logs: RequestLogs,
    pub response_logs: ResponseLogs,
}

impl RequestSnapshot {
    pub fn capture(
        request: &Request,
        request_id: RequestId,
        extra_headers: Arc<[HeaderName]>,
        request_logs: RequestLogs,
        response_logs: ResponseLogs,
    ) -> Self {
        Self {
            request_id,
            method: request.method().clone(),
            uri: request.uri().clone(),
            original_uri: request
                .extensions()
                .get::<OriginalUri>()
                .map(|OriginalUri(uri)| uri.clone()),
            version: request.version(),
            headers: request.headers().clone(),
            client_addr: request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| *addr),
            extra_headers,
            request_logs,
            response_logs,
        }
    }
}

/// Signature shared by every extractor.
pub type Extractor = fn(&RequestSnapshot, &Completion) -> Fields;

/// Extractors in fold order.
pub const EXTRACTORS: [Extractor; 12] = [
    request_id,
    status_code,
    method,
    urls,
    client_ip,
    response_time,
    http_version,
    header_fields,
    query,
    path,
    request_logs,
    response_logs,
];

/// Run every extractor and fold the results into one record.
pub fn build_record(snapshot: &RequestSnapshot, completion: &Completion) -> LogRecord {
    LogRecord::from_parts(
        EXTRACTORS
            .iter()
            .map(|extract| extract(snapshot, completion)),
    )
}

fn single(key: &str, value: Value) -> Fields {
    let mut fields = Map::with_capacity(1);
    fields.insert(key.to_owned(), value);
    fields
}

pub fn request_id(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    single("req_id", Value::String(snapshot.request_id.to_string()))
}

pub fn status_code(_: &RequestSnapshot, completion: &Completion) -> Fields {
    let status = completion
        .status
        .map_or(Value::Null, |status| Value::from(status.as_u16()));
    single("statusCode", status)
}

pub fn method(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    single("method", Value::String(snapshot.method.to_string()))
}

fn path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned())
}

/// `url` as this layer saw it, `originalUrl` before any router nesting stripped a prefix.
pub fn urls(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    let url = path_and_query(&snapshot.uri);
    let original = snapshot
        .original_uri
        .as_ref()
        .map_or_else(|| url.clone(), path_and_query);
    let mut fields = single("url", Value::String(url));
    fields.insert("originalUrl".to_owned(), Value::String(original));
    fields
}

pub fn client_ip(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    let ip = snapshot
        .client_addr
        .map_or(Value::Null, |addr| Value::String(addr.ip().to_string()));
    single("ip", ip)
}

/// Milliseconds with sub-millisecond precision, never rounded.
pub fn response_time(_: &RequestSnapshot, completion: &Completion) -> Fields {
    let millis = completion.elapsed.as_nanos() as f64 / 1e6;
    single("response_time", Value::from(millis))
}

pub fn format_version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_11 => "1.1",
        Version::HTTP_2 => "2.0",
        Version::HTTP_3 => "3.0",
        _ => "1.1",
    }
}

pub fn http_version(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    single(
        "http_version",
        Value::String(format_version(snapshot.version).to_owned()),
    )
}

fn header_value(headers: &HeaderMap, name: &HeaderName) -> Value {
    // Bytes outside visible ASCII are decoded lossily; null means the header was absent.
    let values: Vec<String> = headers
        .get_all(name)
        .iter()
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .collect();
    if values.is_empty() {
        Value::Null
    } else {
        Value::String(values.join(", "))
    }
}

/// Basic headers first, then the configured extras, under `req_headers`.
pub fn header_fields(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    let headers = BASIC_HEADER_FIELDS
        .iter()
        .chain(snapshot.extra_headers.iter())
        .fold(Map::new(), |mut acc, name| {
            acc.insert(
                name.as_str().to_owned(),
                header_value(&snapshot.headers, name),
            );
            acc
        });
    single("req_headers", Value::Object(headers))
}

/// Parsed query string under `req_query`; repeated keys collect into arrays.
pub fn query(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    let pairs: Vec<(String, String)> = snapshot
        .uri
        .query()
        .and_then(|raw| serde_urlencoded::from_str(raw).ok())
        .unwrap_or_default();
    let parsed = pairs.into_iter().fold(Map::new(), |mut acc, (key, value)| {
        match acc.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                acc.insert(key, Value::String(value));
            }
        }
        acc
    });
    single("req_query", Value::Object(parsed))
}

pub fn path(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    single("path", Value::String(snapshot.uri.path().to_owned()))
}

pub fn request_logs(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    single("logs", Value::Object(snapshot.request_logs.snapshot()))
}

pub fn response_logs(snapshot: &RequestSnapshot, _: &Completion) -> Fields {
    single("res_logs", Value::Object(snapshot.response_logs.snapshot()))
}
