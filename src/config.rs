//! Middleware configuration and its construction-time validation.

use axum::http::{header::InvalidHeaderName, HeaderName};
use serde::Deserialize;
use std::sync::Arc;

use crate::types::Severity;

/// Errors raised while building the middleware.
///
/// These are the only errors the crate ever surfaces: once a layer exists, logging can
/// no longer fail a request.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("log sink has no `{0}` emitter; info, warn and error are all required")]
    MissingEmitter(Severity),
    #[error("invalid header name {name:?} in logged headers")]
    InvalidHeader {
        name: String,
        #[source]
        source: InvalidHeaderName,
    },
}

/// Configuration for the request logging middleware.
///
/// # Examples
///
/// ```rust
/// use reqlog::RequestLoggerConfig;
///
/// // Only the basic headers (referer, user-agent)
/// let config = RequestLoggerConfig::default();
///
/// // Also record a couple of extra request headers
/// let config = RequestLoggerConfig {
///     headers: vec!["x-forwarded-for".into(), "X-Tenant".into()],
/// };
/// ```
///
/// The struct deserializes with every field optional, so it can be embedded in a host
/// application's own configuration file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RequestLoggerConfig {
    /// Extra request headers to record under `req_headers`, on top of `referer` and
    /// `user-agent`.
    pub headers: Vec<String>,
}

impl RequestLoggerConfig {
    /// Validate header names once, lowercasing them and dropping duplicates while
    /// keeping the first occurrence's position.
    pub(crate) fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        let mut headers: Vec<HeaderName> = Vec::with_capacity(self.headers.len());
        for raw in &self.headers {
            let name = HeaderName::from_bytes(raw.trim().to_ascii_lowercase().as_bytes())
                .map_err(|source| ConfigError::InvalidHeader {
                    name: raw.clone(),
                    source,
                })?;
            if !headers.contains(&name) {
                headers.push(name);
            }
        }
        Ok(ValidatedConfig {
            headers: headers.into(),
        })
    }
}

/// Configuration after validation, captured by every service the layer produces.
#[derive(Clone, Debug)]
pub(crate) struct ValidatedConfig {
    pub(crate) headers: Arc<[HeaderName]>,
}
