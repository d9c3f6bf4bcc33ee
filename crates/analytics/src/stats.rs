//! Delivery counters and the read-only views exposed by the orchestrator.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use pulse_core::{BackendKind, ConfigSummary, Session};
use serde::Serialize;

/// Running totals, mirrored to the `metrics` facade as they change.
#[derive(Debug, Default)]
pub struct DeliveryCounters {
    tracked: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    retried: AtomicU64,
    per_backend: DashMap<BackendKind, BackendStats>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStats {
    pub batches_sent: u64,
    pub events_sent: u64,
    pub failures: u64,
}

impl DeliveryCounters {
    pub fn record_tracked(&self) {
        self.tracked.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("analytics.queued").increment(1);
    }

    pub fn record_sent(&self, backend: BackendKind, events: usize) {
        self.delivered.fetch_add(events as u64, Ordering::Relaxed);
        metrics::counter!("analytics.flushed", "backend" => backend.as_str())
            .increment(events as u64);
        let mut entry = self.per_backend.entry(backend).or_default();
        entry.batches_sent += 1;
        entry.events_sent += events as u64;
    }

    pub fn record_failure(&self, backend: BackendKind) {
        metrics::counter!("analytics.flush_errors", "backend" => backend.as_str()).increment(1);
        self.per_backend.entry(backend).or_default().failures += 1;
    }

    pub fn record_retried(&self, events: usize) {
        if events == 0 {
            return;
        }
        self.retried.fetch_add(events as u64, Ordering::Relaxed);
        metrics::counter!("analytics.retried").increment(events as u64);
    }

    pub fn record_dropped(&self, events: usize) {
        if events == 0 {
            return;
        }
        self.dropped.fetch_add(events as u64, Ordering::Relaxed);
        metrics::counter!("analytics.dropped").increment(events as u64);
    }

    pub fn tracked(&self) -> u64 {
        self.tracked.load(Ordering::Relaxed)
    }

    /// Successful event deliveries, counted once per backend.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Event deliveries abandoned, counted once per backend.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn backend(&self, backend: BackendKind) -> BackendStats {
        self.per_backend
            .get(&backend)
            .map(|s| *s)
            .unwrap_or_default()
    }
}

/// Session snapshot plus live activity, as returned by `session_metrics()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    #[serde(flatten)]
    pub session: Option<Session>,
    pub current_url: String,
    /// Milliseconds since session start, zero without a session.
    pub session_duration: i64,
    pub events_count: usize,
    pub services_active: Vec<BackendKind>,
    /// Epoch milliseconds.
    pub last_activity: i64,
    pub events_tracked: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub events_retried: u64,
}

/// Orchestrator state, as returned by `stats()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    pub is_initialized: bool,
    pub services_count: usize,
    pub queue_length: usize,
    pub session_data: Option<Session>,
    pub config: ConfigSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_per_backend() {
        let counters = DeliveryCounters::default();
        counters.record_sent(BackendKind::Internal, 3);
        counters.record_sent(BackendKind::Internal, 2);
        counters.record_failure(BackendKind::Sentry);
        counters.record_dropped(4);
        counters.record_retried(0);

        assert_eq!(counters.delivered(), 5);
        assert_eq!(counters.dropped(), 4);
        assert_eq!(counters.retried(), 0);
        assert_eq!(
            counters.backend(BackendKind::Internal),
            BackendStats {
                batches_sent: 2,
                events_sent: 5,
                failures: 0
            }
        );
        assert_eq!(counters.backend(BackendKind::Sentry).failures, 1);
        assert_eq!(counters.backend(BackendKind::Hotjar), BackendStats::default());
    }
}
