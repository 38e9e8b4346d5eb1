//! Exactly-once completion handling.
//!
//! A request can end in more than one way: the response body streams to its end, the body
//! is dropped half way through because the client went away, or the response future
//! itself is dropped before the inner service answered. Any of these may be observed, and
//! more than one can happen for the same request (a body that finished and is then
//! dropped). [`CompletionGate`] turns them into a single emission.

use axum::{body::Bytes, http::StatusCode};
use http_body::{Body, Frame, SizeHint};
use std::{
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{ready, Context, Poll},
    time::Instant,
};
use tracing::debug;

use crate::{
    extract::{build_record, RequestSnapshot},
    sink::LogSink,
    types::{Completion, CompletionSignal, Severity},
};

/// Everything needed to build a record, held until the gate fires.
pub(crate) struct Pending {
    pub(crate) snapshot: RequestSnapshot,
    pub(crate) started: Instant,
    pub(crate) status: Option<StatusCode>,
    pub(crate) sink: Arc<dyn LogSink>,
}

enum GateState {
    Armed(Box<Pending>),
    Fired,
}

/// Single-use gate: `Armed` until the first completion signal, `Fired` forever after.
pub(crate) struct CompletionGate {
    state: Mutex<GateState>,
}

impl CompletionGate {
    pub(crate) fn new(pending: Pending) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GateState::Armed(Box::new(pending))),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remember the response status. Ignored once fired.
    pub(crate) fn record_status(&self, status: StatusCode) {
        if let GateState::Armed(pending) = &mut *self.lock() {
            pending.status = Some(status);
        }
    }

    pub(crate) fn is_fired(&self) -> bool {
        matches!(*self.lock(), GateState::Fired)
    }

    /// Build and emit the record if this is the first signal. Returns whether it emitted.
    pub(crate) fn fire(&self, signal: CompletionSignal) -> bool {
        // The state is swapped under the lock; building and emitting happen outside it.
        let previous = std::mem::replace(&mut *self.lock(), GateState::Fired);
        let GateState::Armed(pending) = previous else {
            return false;
        };

        let completion = Completion {
            signal,
            status: pending.status,
            elapsed: pending.started.elapsed(),
        };
        let record = build_record(&pending.snapshot, &completion);
        let severity = Severity::from_status(record.status_code());
        debug!(
            request_id = %pending.snapshot.request_id,
            signal = ?signal,
            severity = %severity,
            "Request completed, emitting record"
        );
        pending.sink.emit(severity, record);
        true
    }
}

/// Fires [`CompletionSignal::Close`] if dropped while still holding the gate.
///
/// Lives inside the response future, covering the span between calling the inner service
/// and handing the gate over to the response body.
pub(crate) struct GateGuard {
    gate: Option<Arc<CompletionGate>>,
}

impl GateGuard {
    pub(crate) fn new(gate: Arc<CompletionGate>) -> Self {
        Self { gate: Some(gate) }
    }

    /// Stand down without firing; the response body owns completion from here.
    pub(crate) fn disarm(mut self) {
        self.gate = None;
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            debug!("Response future dropped before completion");
            gate.fire(CompletionSignal::Close);
        }
    }
}

/// Response body wrapper that fires the gate when the body ends or is dropped.
///
/// Frames pass through untouched. Reaching the end of the stream fires
/// [`CompletionSignal::Finish`]; a stream error, or dropping the body before its end,
/// fires [`CompletionSignal::Close`].
pub(crate) struct CompletionBody<B: Body> {
    inner: B,
    gate: Arc<CompletionGate>,
}

impl<B: Body> CompletionBody<B> {
    pub(crate) fn new(inner: B, gate: Arc<CompletionGate>) -> Self {
        Self { inner, gate }
    }
}

impl<B> Body for CompletionBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &polled {
            None => {
                this.gate.fire(CompletionSignal::Finish);
            }
            Some(Err(_)) => {
                this.gate.fire(CompletionSignal::Close);
            }
            Some(Ok(_)) if this.inner.is_end_stream() => {
                this.gate.fire(CompletionSignal::Finish);
            }
            Some(Ok(_)) => {}
        }
        Poll::Ready(polled)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: Body> Drop for CompletionBody<B> {
    fn drop(&mut self) {
        // Bodies known to be empty are often never polled; dropping them is a finish.
        let signal = if self.inner.is_end_stream() {
            CompletionSignal::Finish
        } else {
            CompletionSignal::Close
        };
        self.gate.fire(signal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        sink::FnSink,
        types::{LogRecord, RequestId, RequestLogs, ResponseLogs},
    };
    use axum::body::Body as AxumBody;
    use http_body_util::BodyExt;
    use uuid::Uuid;

    type Emitted = Arc<Mutex<Vec<(Severity, LogRecord)>>>;

    fn recording_sink() -> (Arc<dyn LogSink>, Emitted) {
        let emitted: Emitted = Arc::default();
        let (i, w, e) = (emitted.clone(), emitted.clone(), emitted.clone());
        let sink = FnSink::builder()
            .info(move |r| i.lock().unwrap().push((Severity::Info, r)))
            .warn(move |r| w.lock().unwrap().push((Severity::Warn, r)))
            .error(move |r| e.lock().unwrap().push((Severity::Error, r)))
            .build()
            .unwrap();
        (Arc::new(sink), emitted)
    }

    fn armed_gate(sink: Arc<dyn LogSink>) -> Arc<CompletionGate> {
        let request = axum::http::Request::builder().uri("/gate").body(AxumBody::empty()).unwrap();
        let snapshot = RequestSnapshot::capture(
            &request,
            RequestId(Uuid::nil()),
            Arc::from(Vec::new()),
            RequestLogs::default(),
            ResponseLogs::default(),
        );
        CompletionGate::new(Pending {
            snapshot,
            started: Instant::now(),
            status: None,
            sink,
        })
    }

    #[test]
    fn test_gate_fires_once() {
        let (sink, emitted) = recording_sink();
        let gate = armed_gate(sink);
        gate.record_status(StatusCode::NOT_FOUND);

        assert!(gate.fire(CompletionSignal::Finish));
        assert!(!gate.fire(CompletionSignal::Close));
        assert!(!gate.fire(CompletionSignal::Finish));
        assert!(gate.is_fired());

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, Severity::Warn);
        assert_eq!(emitted[0].1.status_code(), Some(404));
    }

    #[test]
    fn test_status_ignored_after_fire() {
        let (sink, emitted) = recording_sink();
        let gate = armed_gate(sink);
        gate.fire(CompletionSignal::Close);
        gate.record_status(StatusCode::INTERNAL_SERVER_ERROR);

        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, Severity::Info);
        assert_eq!(emitted[0].1.status_code(), None);
    }

    #[test]
    fn test_guard_fires_close_on_drop() {
        let (sink, emitted) = recording_sink();
        let gate = armed_gate(sink);
        drop(GateGuard::new(gate.clone()));
        assert!(gate.is_fired());
        assert_eq!(emitted.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_disarmed_guard_does_not_fire() {
        let (sink, emitted) = recording_sink();
        let gate = armed_gate(sink);
        GateGuard::new(gate.clone()).disarm();
        assert!(!gate.is_fired());
        assert!(emitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_body_fires_finish_at_end_and_not_again_on_drop() {
        let (sink, emitted) = recording_sink();
        let gate = armed_gate(sink);
        gate.record_status(StatusCode::OK);

        let body = CompletionBody::new(AxumBody::from("Hello, World!"), gate.clone());
        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(collected, "Hello, World!");

        assert!(gate.is_fired());
        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, Severity::Info);
    }

    #[test]
    fn test_body_dropped_unread_fires_close() {
        let (sink, emitted) = recording_sink();
        let gate = armed_gate(sink);
        gate.record_status(StatusCode::BAD_GATEWAY);

        drop(CompletionBody::new(AxumBody::from("never sent"), gate.clone()));

        assert!(gate.is_fired());
        let emitted = emitted.lock().unwrap();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].0, Severity::Error);
        assert_eq!(emitted[0].1.status_code(), Some(502));
    }
}
