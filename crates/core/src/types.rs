use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Free-form event properties, always a JSON object.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Sentinel used for environment facts the host could not provide.
pub const UNKNOWN: &str = "unknown";

/// The closed set of analytics backends the orchestrator can fan out to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BackendKind {
    #[serde(rename = "google-analytics")]
    GoogleAnalytics,
    #[serde(rename = "yandex-metrica")]
    YandexMetrica,
    #[serde(rename = "sentry")]
    Sentry,
    #[serde(rename = "appmetrica")]
    AppMetrica,
    #[serde(rename = "openreplay")]
    OpenReplay,
    #[serde(rename = "hotjar")]
    Hotjar,
    #[serde(rename = "internal")]
    Internal,
}

impl BackendKind {
    /// Registration order. `Internal` is last and always enabled.
    pub const ALL: [BackendKind; 7] = [
        BackendKind::GoogleAnalytics,
        BackendKind::YandexMetrica,
        BackendKind::Sentry,
        BackendKind::AppMetrica,
        BackendKind::OpenReplay,
        BackendKind::Hotjar,
        BackendKind::Internal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::GoogleAnalytics => "google-analytics",
            BackendKind::YandexMetrica => "yandex-metrica",
            BackendKind::Sentry => "sentry",
            BackendKind::AppMetrica => "appmetrica",
            BackendKind::OpenReplay => "openreplay",
            BackendKind::Hotjar => "hotjar",
            BackendKind::Internal => "internal",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Scheduling hints attached to an event. They never change what the event means.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventOptions {
    pub priority: Priority,
    pub immediate: bool,
    pub retry: bool,
}

impl Default for EventOptions {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            immediate: false,
            retry: true,
        }
    }
}

impl EventOptions {
    pub fn high_immediate() -> Self {
        Self {
            priority: Priority::High,
            immediate: true,
            ..Default::default()
        }
    }

    pub fn with_priority(priority: Priority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    /// High-priority and immediate events trigger a flush as soon as they are queued.
    pub fn wants_immediate_flush(&self) -> bool {
        self.immediate || self.priority == Priority::High
    }
}

/// A tracked event as it moves through the queue and out to the backends.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub properties: Properties,
    pub options: EventOptions,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Backends still owed this event. `None` means every registered backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<BTreeSet<BackendKind>>,
}

impl Event {
    pub fn new(name: impl Into<String>, properties: Properties, options: EventOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            properties,
            options,
            attempts: 0,
            created_at: Utc::now(),
            targets: None,
        }
    }

    pub fn is_targeted_at(&self, backend: BackendKind) -> bool {
        self.targets
            .as_ref()
            .map_or(true, |targets| targets.contains(&backend))
    }

    pub fn prop(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    pub fn f64_prop(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(|v| v.as_f64())
    }

    /// Milliseconds since the epoch at which the event was tracked.
    pub fn timestamp_ms(&self) -> i64 {
        self.properties
            .get("timestamp")
            .and_then(|v| v.as_i64())
            .unwrap_or_else(|| self.created_at.timestamp_millis())
    }

    pub fn session_id(&self) -> Option<&str> {
        self.str_prop("sessionId")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub effective_type: String,
    pub downlink: f64,
    pub rtt: u32,
}

/// Device facts derived once from the host environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub is_mobile: bool,
    pub is_tablet: bool,
    pub is_desktop: bool,
    pub platform: String,
    pub cookie_enabled: bool,
    pub on_line: bool,
    pub language: String,
    pub languages: Vec<String>,
    pub hardware_concurrency: Option<u32>,
    /// Device memory in GiB, or `"unknown"`.
    pub memory: serde_json::Value,
    pub connection: Option<ConnectionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserAgentInfo {
    pub full: String,
    pub vendor: String,
    pub app_name: String,
    pub app_version: String,
    pub platform: String,
}

/// Immutable snapshot of the client environment, captured once per init.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub device_info: DeviceInfo,
    pub user_agent: UserAgentInfo,
    pub url: String,
    pub referrer: String,
    pub language: String,
    pub timezone: String,
    pub screen_resolution: String,
    pub viewport_size: String,
}
