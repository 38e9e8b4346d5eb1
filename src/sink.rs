//! The logging capability records are handed to.

use std::{fmt, sync::Arc};

use crate::{
    config::ConfigError,
    types::{LogRecord, Severity},
};

/// Destination for completed request records.
///
/// A sink exposes one emission operation per [`Severity`]. The middleware calls exactly
/// one of them, exactly once, per request. Emission is fire-and-forget: whatever a sink
/// does with a record is invisible to the request that produced it.
///
/// Sinks are called from wherever the completion signal fires (response body polling or
/// drop), so they should not block.
///
/// # Examples
///
/// ```rust
/// use reqlog::{LogRecord, LogSink};
///
/// struct Stdout;
///
/// impl LogSink for Stdout {
///     fn info(&self, record: LogRecord) {
///         println!("INFO {record}");
///     }
///
///     fn warn(&self, record: LogRecord) {
///         println!("WARN {record}");
///     }
///
///     fn error(&self, record: LogRecord) {
///         eprintln!("ERROR {record}");
///     }
/// }
/// ```
pub trait LogSink: Send + Sync + 'static {
    fn info(&self, record: LogRecord);
    fn warn(&self, record: LogRecord);
    fn error(&self, record: LogRecord);

    /// Dispatch to the emitter matching `severity`.
    fn emit(&self, severity: Severity, record: LogRecord) {
        match severity {
            Severity::Info => self.info(record),
            Severity::Warn => self.warn(record),
            Severity::Error => self.error(record),
        }
    }
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn info(&self, record: LogRecord) {
        (**self).info(record)
    }

    fn warn(&self, record: LogRecord) {
        (**self).warn(record)
    }

    fn error(&self, record: LogRecord) {
        (**self).error(record)
    }
}

type Emitter = Box<dyn Fn(LogRecord) + Send + Sync + 'static>;

/// A sink assembled from closures.
///
/// Useful when the emitters come from somewhere dynamic (a plugin table, an FFI
/// boundary). The builder refuses to produce a sink unless all three emitters are set.
///
/// ```rust
/// use reqlog::{ConfigError, FnSink, Severity};
///
/// let sink = FnSink::builder()
///     .info(|record| println!("{record}"))
///     .warn(|record| println!("{record}"))
///     .error(|record| eprintln!("{record}"))
///     .build();
/// assert!(sink.is_ok());
///
/// let incomplete = FnSink::builder().info(|_| {}).warn(|_| {}).build();
/// assert!(matches!(incomplete, Err(ConfigError::MissingEmitter(Severity::Error))));
/// ```
pub struct FnSink {
    info: Emitter,
    warn: Emitter,
    error: Emitter,
}

impl FnSink {
    pub fn builder() -> FnSinkBuilder {
        FnSinkBuilder::default()
    }
}

impl fmt::Debug for FnSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

impl LogSink for FnSink {
    fn info(&self, record: LogRecord) {
        (self.info)(record)
    }

    fn warn(&self, record: LogRecord) {
        (self.warn)(record)
    }

    fn error(&self, record: LogRecord) {
        (self.error)(record)
    }
}

/// Builder for [`FnSink`].
#[derive(Default)]
pub struct FnSinkBuilder {
    info: Option<Emitter>,
    warn: Option<Emitter>,
    error: Option<Emitter>,
}

impl FnSinkBuilder {
    pub fn info<F>(mut self, emit: F) -> Self
    where
        F: Fn(LogRecord) + Send + Sync + 'static,
    {
        self.info = Some(Box::new(emit));
        self
    }

    pub fn warn<F>(mut self, emit: F) -> Self
    where
        F: Fn(LogRecord) + Send + Sync + 'static,
    {
        self.warn = Some(Box::new(emit));
        self
    }

    pub fn error<F>(mut self, emit: F) -> Self
    where
        F: Fn(LogRecord) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(emit));
        self
    }

    /// Fails with [`ConfigError::MissingEmitter`] naming the first absent emitter, in
    /// `info`, `warn`, `error` order.
    pub fn build(self) -> Result<FnSink, ConfigError> {
        Ok(FnSink {
            info: self.info.ok_or(ConfigError::MissingEmitter(Severity::Info))?,
            warn: self.warn.ok_or(ConfigError::MissingEmitter(Severity::Warn))?,
            error: self
                .error
                .ok_or(ConfigError::MissingEmitter(Severity::Error))?,
        })
    }
}

impl fmt::Debug for FnSinkBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSinkBuilder")
            .field("info", &self.info.is_some())
            .field("warn", &self.warn.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

/// The configured sink, attached to each request so handlers can emit through it.
#[derive(Clone)]
pub struct AttachedSink(pub Arc<dyn LogSink>);

impl fmt::Debug for AttachedSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AttachedSink")
    }
}

impl std::ops::Deref for AttachedSink {
    type Target = dyn LogSink;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}
