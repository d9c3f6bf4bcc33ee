//! Dispatcher: drains the queue and fans a batch out to every registered
//! adapter concurrently, re-queuing what failed within the retry budget.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use pulse_core::{AnalyticsAdapter, AnalyticsError, BackendKind, Event};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::queue::EventQueue;
use crate::stats::DeliveryCounters;

/// Outcome of one flush cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Events drained from the queue.
    pub drained: usize,
    /// Adapters that were sent a share of the batch.
    pub dispatched_to: usize,
    /// Successful event deliveries, counted once per backend.
    pub delivered: usize,
    /// Events put back at the head of the queue.
    pub requeued: usize,
    /// Event deliveries abandoned, counted once per backend.
    pub dropped: usize,
    /// Highest attempt count among re-queued events.
    pub max_attempts: u32,
}

impl FlushReport {
    pub fn has_retries(&self) -> bool {
        self.requeued > 0
    }
}

pub struct Dispatcher {
    max_retries: u32,
    counters: Arc<DeliveryCounters>,
}

impl Dispatcher {
    pub fn new(max_retries: u32, counters: Arc<DeliveryCounters>) -> Self {
        Self {
            max_retries,
            counters,
        }
    }

    /// Drain the queue and deliver the batch.
    ///
    /// An empty queue or an empty registry is a no-op; in the latter case
    /// events stay queued until adapters are registered. A forced flush
    /// never re-queues.
    pub async fn flush(
        &self,
        queue: &EventQueue,
        services: &[Arc<dyn AnalyticsAdapter>],
        force: bool,
    ) -> FlushReport {
        if services.is_empty() || queue.is_empty() {
            return FlushReport::default();
        }
        let batch = queue.drain_all();
        if batch.is_empty() {
            return FlushReport::default();
        }
        debug!(count = batch.len(), force, "flushing analytics batch");

        let mut report = FlushReport {
            drained: batch.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for service in services {
            let kind = service.kind();
            let owed: Vec<Event> = batch
                .iter()
                .filter(|e| e.is_targeted_at(kind))
                .cloned()
                .collect();
            if owed.is_empty() {
                continue;
            }
            report.dispatched_to += 1;
            let service = Arc::clone(service);
            tasks.spawn(async move {
                let result = service.send_events(&owed).await;
                let ids: Vec<Uuid> = owed.iter().map(|e| e.id).collect();
                (kind, ids, result)
            });
        }

        // Failing backends per event, for events still worth retrying.
        let mut owed_retry: HashMap<Uuid, BTreeSet<BackendKind>> = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            let (kind, ids, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "analytics adapter task aborted");
                    continue;
                }
            };
            match result {
                Ok(()) => {
                    debug!(backend = %kind, count = ids.len(), "events sent");
                    self.counters.record_sent(kind, ids.len());
                    report.delivered += ids.len();
                }
                Err(e) => {
                    let accepted = e.accepted();
                    let total = ids.len();
                    let failed: Vec<Uuid> =
                        ids.into_iter().filter(|id| !accepted.contains(id)).collect();
                    if failed.len() < total {
                        self.counters.record_sent(kind, total - failed.len());
                        report.delivered += total - failed.len();
                    }

                    self.counters.record_failure(kind);
                    let retryable = !force && e.is_retryable();
                    log_failure(kind, &e, failed.len(), retryable);
                    if retryable {
                        for id in failed {
                            owed_retry.entry(id).or_default().insert(kind);
                        }
                    } else {
                        self.counters.record_dropped(failed.len());
                        report.dropped += failed.len();
                    }
                }
            }
        }

        let mut requeue = Vec::new();
        for mut event in batch {
            let Some(failed) = owed_retry.remove(&event.id) else {
                continue;
            };
            if event.options.retry && event.attempts < self.max_retries {
                event.attempts += 1;
                event.targets = Some(failed);
                report.max_attempts = report.max_attempts.max(event.attempts);
                requeue.push(event);
            } else {
                warn!(
                    event = %event.name,
                    attempts = event.attempts,
                    "retry budget exhausted, dropping event"
                );
                self.counters.record_dropped(failed.len());
                report.dropped += failed.len();
            }
        }

        report.requeued = requeue.len();
        self.counters.record_retried(requeue.len());
        queue.requeue_front(requeue);
        report
    }
}

fn log_failure(kind: BackendKind, e: &AnalyticsError, count: usize, retryable: bool) {
    if retryable {
        warn!(backend = %kind, error = %e, count, "failed to send events, will retry");
    } else {
        error!(backend = %kind, error = %e, count, "failed to send events, dropping");
    }
}
