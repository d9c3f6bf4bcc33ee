//! The analytics orchestrator: one instance per process, owned by the host
//! application and passed explicitly to whoever tracks events.
//!
//! `track` and its wrappers are synchronous and never fail. Delivery runs on
//! the Tokio runtime: a periodic flush timer, a size-check timer, immediate
//! flushes for high-priority events, and delayed re-flushes for retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use pulse_core::{
    AdapterFactory, AnalyticsConfig, Event, EventOptions, Priority, Properties, Session,
};
use pulse_web_sdk::StaticAdapterFactory;
use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatcher::{Dispatcher, FlushReport};
use crate::queue::EventQueue;
use crate::registry::ServiceRegistry;
use crate::session::{
    init_session, EnvironmentProvider, FileSessionStore, ProcessEnvironment, SessionStore,
};
use crate::stats::{DeliveryCounters, OrchestratorStats, SessionMetrics};
use crate::throttle::{Debounce, Throttle};

const DEFAULT_BASE_URL: &str = "app://pulse/";

/// Session snapshot with the enrichment values pre-serialized.
struct ActiveSession {
    session: Session,
    user_agent: Value,
    device_info: Value,
}

impl ActiveSession {
    fn new(session: Session) -> Self {
        let user_agent = serde_json::to_value(&session.user_agent).unwrap_or(Value::Null);
        let device_info = serde_json::to_value(&session.device_info).unwrap_or(Value::Null);
        Self {
            session,
            user_agent,
            device_info,
        }
    }
}

pub(crate) struct Inner {
    config: AnalyticsConfig,
    env: Arc<dyn EnvironmentProvider>,
    store: Arc<dyn SessionStore>,
    factory: Arc<dyn AdapterFactory>,
    session: RwLock<Option<Arc<ActiveSession>>>,
    queue: EventQueue,
    registry: ServiceRegistry,
    dispatcher: Dispatcher,
    counters: Arc<DeliveryCounters>,
    flush_throttle: Throttle,
    init_debounce: Debounce,
    init_lock: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    shutdown: watch::Sender<bool>,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the orchestrator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

pub struct OrchestratorBuilder {
    config: AnalyticsConfig,
    env: Option<Arc<dyn EnvironmentProvider>>,
    store: Option<Arc<dyn SessionStore>>,
    factory: Option<Arc<dyn AdapterFactory>>,
}

impl OrchestratorBuilder {
    pub fn environment(mut self, env: Arc<dyn EnvironmentProvider>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn adapter_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn build(self) -> Orchestrator {
        let config = self.config;
        let env = self
            .env
            .unwrap_or_else(|| Arc::new(ProcessEnvironment::new(DEFAULT_BASE_URL)));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(FileSessionStore::new(config.session_path())));
        let factory = self
            .factory
            .unwrap_or_else(|| Arc::new(StaticAdapterFactory));
        let counters = Arc::new(DeliveryCounters::default());
        let (shutdown, _) = watch::channel(false);

        Orchestrator {
            inner: Arc::new(Inner {
                dispatcher: Dispatcher::new(config.max_retries, Arc::clone(&counters)),
                flush_throttle: Throttle::new(config.flush_throttle()),
                init_debounce: Debounce::new(config.init_debounce()),
                config,
                env,
                store,
                factory,
                session: RwLock::new(None),
                queue: EventQueue::new(),
                registry: ServiceRegistry::new(),
                counters,
                init_lock: tokio::sync::Mutex::new(()),
                initialized: AtomicBool::new(false),
                shutdown,
                scheduler: Mutex::new(None),
            }),
        }
    }
}

impl Orchestrator {
    pub fn builder(config: AnalyticsConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            env: None,
            store: None,
            factory: None,
        }
    }

    /// Orchestrator with the process environment, file-backed session store
    /// and the built-in backend adaptors.
    pub fn new(config: AnalyticsConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.inner.config
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Events waiting for delivery, oldest first.
    pub fn pending_events(&self) -> Vec<Event> {
        self.inner.queue.snapshot()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|active| active.session.clone())
    }

    pub fn counters(&self) -> &DeliveryCounters {
        &self.inner.counters
    }

    // ---- lifecycle ----

    /// Capture the session, register backends and start the timers.
    /// Calling it again after success does nothing.
    pub async fn init(&self) {
        let _guard = self.inner.init_lock.lock().await;
        if self.is_initialized() {
            return;
        }
        info!("initializing analytics orchestrator");

        let session = init_session(self.inner.env.as_ref(), self.inner.store.as_ref());
        let active = Arc::new(ActiveSession::new(session));
        *self.inner.session.write() = Some(Arc::clone(&active));

        let failures = self
            .inner
            .registry
            .register_services(&self.inner.config, &active.session, self.inner.factory.as_ref())
            .await;
        for failure in &failures {
            let mut data = Properties::new();
            data.insert("message".into(), json!(failure.error.to_string()));
            data.insert("backend".into(), json!(failure.backend));
            self.report_error(&failure.error_type(), data);
        }

        self.start_scheduler();
        self.inner.initialized.store(true, Ordering::SeqCst);
        info!(
            session_id = %active.session.session_id,
            services = self.inner.registry.len(),
            failed = failures.len(),
            "analytics orchestrator initialized"
        );

        let mut props = Properties::new();
        props.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
        self.track("analytics_initialized", props, EventOptions::default());
    }

    /// Debounced [`init`](Self::init): bursts of requests collapse into one
    /// init after the quiet window.
    pub fn request_init(&self) {
        let this = self.clone();
        if !self.inner.init_debounce.call(move || async move { this.init().await }) {
            warn!("no async runtime, init request ignored");
        }
    }

    /// Stop the timers and make a final forced flush.
    pub async fn shutdown(&self) -> FlushReport {
        self.inner.init_debounce.cancel();
        self.inner.shutdown.send_replace(true);
        let scheduler = self.inner.scheduler.lock().take();
        if let Some(task) = scheduler {
            task.abort();
        }
        let report = self.flush(true).await;
        info!(
            delivered = report.delivered,
            dropped = report.dropped,
            "analytics orchestrator shut down"
        );
        report
    }

    fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    fn start_scheduler(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime, periodic flushing disabled");
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.subscribe();
        let flush_every = self.inner.config.flush_interval();
        let check_every = self.inner.config.size_check_interval();
        let batch_size = self.inner.config.batch_size;

        let task = handle.spawn(run_scheduler(weak, shutdown, flush_every, check_every, batch_size));
        if let Some(previous) = self.inner.scheduler.lock().replace(task) {
            previous.abort();
        }
    }

    // ---- flushing ----

    /// Deliver everything queued. A forced flush never re-queues failures.
    pub async fn flush(&self, force: bool) -> FlushReport {
        let services = self.inner.registry.services();
        let report = self
            .inner
            .dispatcher
            .flush(&self.inner.queue, &services, force)
            .await;
        if report.has_retries() {
            self.schedule_retry(report.max_attempts);
        }
        report
    }

    /// Flush unless another flush started within the throttle window.
    pub async fn throttled_flush(&self) -> Option<FlushReport> {
        if !self.inner.flush_throttle.try_acquire() {
            debug!("flush throttled");
            return None;
        }
        Some(self.flush(false).await)
    }

    fn spawn_flush(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => self.spawn_flush_on(&handle),
            Err(_) => debug!("no async runtime, immediate flush deferred"),
        }
    }

    /// Immediate flush on a known runtime, for callers outside any runtime context.
    pub(crate) fn spawn_flush_on(&self, handle: &tokio::runtime::Handle) {
        let this = self.clone();
        handle.spawn(async move {
            this.flush(false).await;
        });
    }

    fn schedule_retry(&self, attempts: u32) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let delay = self.inner.config.retry_delay(attempts);
        debug!(attempts, delay_ms = delay.as_millis() as u64, "retry flush scheduled");
        let this = self.clone();
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if !this.is_shut_down() {
                this.flush(false).await;
            }
        });
    }

    // ---- tracking ----

    /// Queue an event. Returns its id; when collection is disabled nothing
    /// is queued and a fresh id is still returned.
    pub fn track(&self, name: &str, properties: Properties, options: EventOptions) -> Uuid {
        if !self.inner.config.is_collecting() {
            return Uuid::new_v4();
        }

        let mut properties = properties;
        let active = self.inner.session.read().clone();
        properties.insert(
            "sessionId".into(),
            active
                .as_ref()
                .map_or(Value::Null, |a| json!(a.session.session_id)),
        );
        properties.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
        properties.insert("url".into(), json!(self.inner.env.current_url()));
        properties.insert(
            "userAgent".into(),
            active.as_ref().map_or(Value::Null, |a| a.user_agent.clone()),
        );
        properties.insert(
            "deviceInfo".into(),
            active.as_ref().map_or(Value::Null, |a| a.device_info.clone()),
        );

        let event = Event::new(name, properties, options);
        let id = event.id;
        let queued = self.inner.queue.push_back(event);
        self.inner.counters.record_tracked();
        if self.inner.config.debug {
            info!(event = name, queue_len = queued, "analytics event queued");
        } else {
            debug!(event = name, queue_len = queued, "analytics event queued");
        }

        if options.wants_immediate_flush() {
            self.spawn_flush();
        }
        id
    }

    /// `page_view`, high priority. `path` defaults to the current location.
    pub fn track_page_view(&self, path: Option<&str>, extra: Properties) -> Uuid {
        let page = path
            .map(str::to_string)
            .unwrap_or_else(|| self.inner.env.current_path());
        let referrer = self
            .inner
            .session
            .read()
            .as_ref()
            .map(|a| a.session.referrer.clone())
            .unwrap_or_default();

        let mut props = Properties::new();
        props.insert("page".into(), json!(page));
        props.insert(
            "title".into(),
            json!(self.inner.env.page_title().unwrap_or_default()),
        );
        props.insert("referrer".into(), json!(referrer));
        props.extend(extra);
        self.track("page_view", props, EventOptions::high_immediate())
    }

    /// `swipe_navigation`. `method` is `touch`, `keyboard` or `click`; defaults to `touch`.
    pub fn track_swipe(
        &self,
        direction: &str,
        from_section: &str,
        to_section: &str,
        method: Option<&str>,
    ) -> Uuid {
        let mut props = Properties::new();
        props.insert("direction".into(), json!(direction));
        props.insert("fromSection".into(), json!(from_section));
        props.insert("toSection".into(), json!(to_section));
        props.insert("method".into(), json!(method.unwrap_or("touch")));
        props.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
        self.track(
            "swipe_navigation",
            props,
            EventOptions::with_priority(Priority::Normal),
        )
    }

    pub fn track_section_view(
        &self,
        section_name: &str,
        section_index: usize,
        duration_ms: Option<u64>,
    ) -> Uuid {
        let mut props = Properties::new();
        props.insert("sectionName".into(), json!(section_name));
        props.insert("sectionIndex".into(), json!(section_index));
        props.insert("duration".into(), json!(duration_ms));
        props.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
        self.track("section_view", props, EventOptions::default())
    }

    pub fn track_performance(&self, metric_name: &str, data: Properties) -> Uuid {
        let mut props = Properties::new();
        props.insert("metric".into(), json!(metric_name));
        props.extend(data);
        self.track(
            "performance_metric",
            props,
            EventOptions::with_priority(Priority::Low),
        )
    }

    /// `error` event, high priority and flushed immediately.
    pub fn report_error(&self, error_type: &str, error_data: Properties) -> Uuid {
        let mut props = Properties::new();
        props.insert("type".into(), json!(error_type));
        props.extend(error_data);
        self.track("error", props, EventOptions::high_immediate())
    }

    // ---- inspection ----

    pub fn session_metrics(&self) -> SessionMetrics {
        let session = self.session();
        let now = Utc::now();
        let counters = &self.inner.counters;
        SessionMetrics {
            session_duration: session
                .as_ref()
                .map_or(0, |s| (now - s.start_time).num_milliseconds()),
            session,
            current_url: self.inner.env.current_url(),
            events_count: self.inner.queue.len(),
            services_active: self.inner.registry.kinds(),
            last_activity: now.timestamp_millis(),
            events_tracked: counters.tracked(),
            events_delivered: counters.delivered(),
            events_dropped: counters.dropped(),
            events_retried: counters.retried(),
        }
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            is_initialized: self.is_initialized(),
            services_count: self.inner.registry.len(),
            queue_length: self.inner.queue.len(),
            session_data: self.session(),
            config: self.inner.config.summary(),
        }
    }

    /// Forget everything held for this session: queued events, the session
    /// snapshot and its stored copy, and whatever each backend keeps.
    pub async fn clear_data(&self) {
        let dropped = self.inner.queue.clear();
        *self.inner.session.write() = None;
        if let Err(e) = self.inner.store.remove() {
            warn!(error = %e, "cannot remove stored session snapshot");
        }

        let services = self.inner.registry.services();
        for service in services.iter() {
            if let Err(e) = service.clear_data().await {
                warn!(backend = %service.kind(), error = %e, "backend failed to clear data");
            }
        }
        info!(dropped, "analytics data cleared");
    }
}

async fn run_scheduler(
    inner: Weak<Inner>,
    mut shutdown: watch::Receiver<bool>,
    flush_every: std::time::Duration,
    check_every: std::time::Duration,
    batch_size: usize,
) {
    let mut flush_tick = interval_at(Instant::now() + flush_every, flush_every);
    let mut size_tick = interval_at(Instant::now() + check_every, check_every);
    flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    size_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let size_check = tokio::select! {
            _ = flush_tick.tick() => false,
            _ = size_tick.tick() => true,
            _ = shutdown.changed() => break,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let orchestrator = Orchestrator { inner };
        let queued = orchestrator.queue_len();
        let due = if size_check {
            queued >= batch_size.max(1)
        } else {
            queued > 0
        };
        if due {
            orchestrator.throttled_flush().await;
        }
    }
    debug!("flush scheduler stopped");
}
