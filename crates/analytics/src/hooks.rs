//! Host lifecycle hooks. The embedding application calls these from its own
//! router, visibility and error handlers.

use std::sync::Arc;

use chrono::Utc;
use pulse_core::{EventOptions, Properties};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::dispatcher::FlushReport;
use crate::orchestrator::Orchestrator;

/// An uncaught runtime error reported by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeError {
    pub message: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
    pub colno: Option<u32>,
    pub stack: Option<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }
}

impl Orchestrator {
    /// The host router moved to `path`.
    pub fn on_navigation(&self, path: &str) -> Uuid {
        self.track_page_view(Some(path), Properties::new())
    }

    pub fn on_visibility_change(&self, visible: bool) -> Uuid {
        let mut props = Properties::new();
        props.insert("visible".into(), json!(visible));
        props.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
        self.track("page_visibility_change", props, EventOptions::default())
    }

    /// The host is going away: last-chance forced flush.
    pub async fn on_unload(&self) -> FlushReport {
        self.flush(true).await
    }

    pub fn report_runtime_error(&self, error: RuntimeError) -> Uuid {
        let mut data = Properties::new();
        data.insert("message".into(), json!(error.message));
        data.insert("filename".into(), json!(error.filename));
        data.insert("lineno".into(), json!(error.lineno));
        data.insert("colno".into(), json!(error.colno));
        data.insert("stack".into(), json!(error.stack));
        self.report_error("javascript_error", data)
    }

    pub fn report_unhandled_rejection(&self, reason: Value, stack: Option<String>) -> Uuid {
        let mut data = Properties::new();
        data.insert("reason".into(), reason);
        data.insert("stack".into(), json!(stack));
        self.report_error("unhandled_promise_rejection", data)
    }

    /// Report panics as runtime errors, then hand them to the previously
    /// installed hook. The hook does not keep the orchestrator alive.
    ///
    /// Panics on threads outside the async runtime still flush: the hook
    /// spawns the delivery on the runtime that was current at install time.
    pub fn install_panic_hook(&self) {
        let inner = Arc::downgrade(&self.inner);
        let runtime = Handle::try_current().ok();
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(inner) = inner.upgrade() {
                let message = info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| info.payload().downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                let location = info.location();
                let thread = std::thread::current();
                let orchestrator = Orchestrator { inner };
                orchestrator.report_runtime_error(RuntimeError {
                    message,
                    filename: location.map(|l| l.file().to_string()),
                    lineno: location.map(|l| l.line()),
                    colno: location.map(|l| l.column()),
                    stack: thread.name().map(|name| format!("thread '{name}'")),
                });
                if Handle::try_current().is_err() {
                    if let Some(runtime) = &runtime {
                        orchestrator.spawn_flush_on(runtime);
                    }
                }
            }
            previous(info);
        }));
    }
}
