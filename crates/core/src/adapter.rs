//! Backend adapter contract: the uniform init/send/clear surface every
//! analytics backend exposes to the orchestrator.
//!
//! Concrete adapters live in `pulse-web-sdk`. This module also carries the
//! in-memory [`RecordingAdapter`] used by tests and dry runs.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, AnalyticsResult};
use crate::types::{BackendKind, Event, Session};

/// A thin wrapper around one analytics backend.
#[async_trait]
pub trait AnalyticsAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// One-time setup. A failure keeps the backend out of the registry.
    async fn init(&self) -> AnalyticsResult<()>;

    /// Deliver a batch in FIFO order. An error means the batch is undelivered
    /// for this backend, except the events listed by
    /// [`AnalyticsError::PartialDelivery`].
    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()>;

    /// Forget any state held for the current session.
    async fn clear_data(&self) -> AnalyticsResult<()> {
        Ok(())
    }
}

/// Everything an adapter may need at construction time.
#[derive(Debug, Clone, Copy)]
pub struct AdapterContext<'a> {
    pub config: &'a AnalyticsConfig,
    pub session: &'a Session,
}

/// Maps a backend kind to a constructed (not yet initialized) adapter.
pub trait AdapterFactory: Send + Sync {
    fn create(
        &self,
        kind: BackendKind,
        ctx: AdapterContext<'_>,
    ) -> AnalyticsResult<Arc<dyn AnalyticsAdapter>>;
}

/// Scripted failure mode for a [`RecordingAdapter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Never,
    /// Fail this many sends, then succeed.
    Times(u32),
    Always,
    /// Fail every send with a non-retryable error.
    Permanent,
    /// Accept only the first `n` events of the first send, then succeed.
    PartialOnce(usize),
}

/// In-memory adapter that records every delivered batch.
pub struct RecordingAdapter {
    kind: BackendKind,
    failure: FailureMode,
    fail_init: bool,
    failures: AtomicU32,
    send_calls: AtomicU32,
    batches: Mutex<Vec<Vec<Event>>>,
    cleared: AtomicU32,
}

impl RecordingAdapter {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            failure: FailureMode::Never,
            fail_init: false,
            failures: AtomicU32::new(0),
            send_calls: AtomicU32::new(0),
            batches: Mutex::new(Vec::new()),
            cleared: AtomicU32::new(0),
        }
    }

    pub fn failing(mut self, failure: FailureMode) -> Self {
        self.failure = failure;
        self
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Successfully delivered batches, in delivery order.
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.lock().clone()
    }

    /// Successfully delivered events, flattened.
    pub fn delivered(&self) -> Vec<Event> {
        self.batches().into_iter().flatten().collect()
    }

    /// Every `send_events` call, successful or not.
    pub fn send_calls(&self) -> u32 {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) -> u32 {
        self.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsAdapter for RecordingAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn init(&self) -> AnalyticsResult<()> {
        if self.fail_init {
            return Err(AnalyticsError::adapter(self.kind, "scripted init failure"));
        }
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        let fail = match self.failure {
            FailureMode::Never => false,
            FailureMode::Always | FailureMode::Permanent => true,
            FailureMode::Times(n) => self.failures.load(Ordering::SeqCst) < n,
            FailureMode::PartialOnce(_) => self.failures.load(Ordering::SeqCst) < 1,
        };
        if fail {
            self.failures.fetch_add(1, Ordering::SeqCst);
            if self.failure == FailureMode::Permanent {
                return Err(AnalyticsError::InvalidCredentials {
                    backend: self.kind,
                    message: "scripted permanent failure".into(),
                });
            }
            if let FailureMode::PartialOnce(n) = self.failure {
                let accepted = &events[..n.min(events.len())];
                self.batches.lock().push(accepted.to_vec());
                return Err(AnalyticsError::partial(
                    accepted.iter().map(|e| e.id).collect(),
                    AnalyticsError::ServerError {
                        status: 503,
                        message: "scripted failure".into(),
                    },
                ));
            }
            return Err(AnalyticsError::ServerError {
                status: 503,
                message: "scripted failure".into(),
            });
        }
        self.batches.lock().push(events.to_vec());
        Ok(())
    }

    async fn clear_data(&self) -> AnalyticsResult<()> {
        self.cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventOptions, Properties};

    fn event(name: &str) -> Event {
        Event::new(name, Properties::new(), EventOptions::default())
    }

    #[tokio::test]
    async fn test_recording_adapter_fails_then_succeeds() {
        let adapter = RecordingAdapter::new(BackendKind::Internal).failing(FailureMode::Times(2));

        assert!(adapter.send_events(&[event("a")]).await.is_err());
        assert!(adapter.send_events(&[event("a")]).await.is_err());
        assert!(adapter.send_events(&[event("a")]).await.is_ok());

        assert_eq!(adapter.send_calls(), 3);
        assert_eq!(adapter.batches().len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retryable() {
        let adapter = RecordingAdapter::new(BackendKind::Sentry).failing(FailureMode::Permanent);
        let err = adapter.send_events(&[event("a")]).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_partial_once_reports_accepted_prefix() {
        let adapter =
            RecordingAdapter::new(BackendKind::Internal).failing(FailureMode::PartialOnce(1));
        let batch = [event("a"), event("b")];

        let err = adapter.send_events(&batch).await.unwrap_err();
        assert_eq!(err.accepted(), &[batch[0].id]);
        assert!(err.is_retryable());
        assert!(adapter.send_events(&batch[1..]).await.is_ok());

        let names: Vec<_> = adapter.delivered().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a", "b"]);
    }
}
