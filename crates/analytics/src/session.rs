//! Session context: a one-time snapshot of client, device and environment
//! facts used to enrich every event.
//!
//! Facts come from an injected [`EnvironmentProvider`]; the snapshot is
//! persisted best-effort through a [`SessionStore`].

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use pulse_core::types::{ConnectionInfo, DeviceInfo, UserAgentInfo, UNKNOWN};
use pulse_core::{AnalyticsError, AnalyticsResult, Session};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

const MOBILE_TOKENS: [&str; 8] = [
    "android",
    "webos",
    "iphone",
    "ipad",
    "ipod",
    "blackberry",
    "iemobile",
    "opera mini",
];

/// Raw environment facts. Any of them may be unavailable on a given host.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    pub user_agent: Option<String>,
    pub vendor: Option<String>,
    pub app_name: Option<String>,
    pub app_version: Option<String>,
    pub platform: Option<String>,
    pub url: Option<String>,
    pub referrer: Option<String>,
    pub language: Option<String>,
    pub languages: Vec<String>,
    pub timezone: Option<String>,
    pub screen: Option<(u32, u32)>,
    pub viewport: Option<(u32, u32)>,
    pub cookie_enabled: Option<bool>,
    pub on_line: Option<bool>,
    pub hardware_concurrency: Option<u32>,
    pub device_memory_gb: Option<f64>,
    pub connection: Option<ConnectionInfo>,
}

/// Source of environment facts for session capture and event enrichment.
pub trait EnvironmentProvider: Send + Sync {
    /// Facts captured once at session init.
    fn snapshot(&self) -> EnvironmentSnapshot;

    /// Live location, read on every event.
    fn current_url(&self) -> String;

    fn page_title(&self) -> Option<String> {
        None
    }

    fn current_path(&self) -> String {
        path_of(&self.current_url())
    }
}

/// Path component of an absolute URL, `/` if there is none.
pub fn path_of(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| "/".to_string())
}

/// Fixed environment. Hosts that know their client facts up front (and tests)
/// construct one directly; navigation updates the live location.
#[derive(Debug)]
pub struct StaticEnvironment {
    snapshot: EnvironmentSnapshot,
    location: RwLock<String>,
    title: RwLock<Option<String>>,
}

impl StaticEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        let location = snapshot
            .url
            .clone()
            .unwrap_or_else(|| "about:blank".to_string());
        Self {
            snapshot,
            location: RwLock::new(location),
            title: RwLock::new(None),
        }
    }

    /// A desktop browser on `https://example.com/`.
    pub fn desktop() -> Self {
        Self::new(EnvironmentSnapshot {
            user_agent: Some(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36"
                    .into(),
            ),
            vendor: Some("Google Inc.".into()),
            app_name: Some("Netscape".into()),
            app_version: Some("5.0".into()),
            platform: Some("Linux x86_64".into()),
            url: Some("https://example.com/".into()),
            referrer: Some(String::new()),
            language: Some("en-US".into()),
            languages: vec!["en-US".into(), "en".into()],
            timezone: Some("UTC".into()),
            screen: Some((1920, 1080)),
            viewport: Some((1440, 900)),
            cookie_enabled: Some(true),
            on_line: Some(true),
            hardware_concurrency: Some(8),
            device_memory_gb: Some(8.0),
            connection: None,
        })
    }

    pub fn navigate(&self, url: impl Into<String>) {
        *self.location.write() = url.into();
    }

    pub fn set_title(&self, title: impl Into<String>) {
        *self.title.write() = Some(title.into());
    }
}

impl EnvironmentProvider for StaticEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.snapshot.clone()
    }

    fn current_url(&self) -> String {
        self.location.read().clone()
    }

    fn page_title(&self) -> Option<String> {
        self.title.read().clone()
    }
}

/// Facts about the host process, for server-side and CLI use.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    base_url: String,
}

impl ProcessEnvironment {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl EnvironmentProvider for ProcessEnvironment {
    fn snapshot(&self) -> EnvironmentSnapshot {
        let language = std::env::var("LANG")
            .ok()
            .and_then(|lang| lang.split('.').next().map(|l| l.replace('_', "-")))
            .filter(|l| !l.is_empty() && l != "C" && l != "POSIX");
        let timezone = std::env::var("TZ")
            .ok()
            .filter(|tz| !tz.is_empty())
            .or_else(|| Some(format!("UTC{}", chrono::Local::now().format("%:z"))));

        EnvironmentSnapshot {
            user_agent: Some(format!(
                "pulse/{} ({}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH
            )),
            app_name: Some("pulse".into()),
            app_version: Some(env!("CARGO_PKG_VERSION").into()),
            platform: Some(format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)),
            url: Some(self.base_url.clone()),
            languages: language.iter().cloned().collect(),
            language,
            timezone,
            on_line: Some(true),
            hardware_concurrency: std::thread::available_parallelism()
                .ok()
                .and_then(|n| u32::try_from(n.get()).ok()),
            ..Default::default()
        }
    }

    fn current_url(&self) -> String {
        self.base_url.clone()
    }
}

fn or_unknown(value: Option<String>) -> String {
    value.unwrap_or_else(|| UNKNOWN.to_string())
}

fn dimensions(value: Option<(u32, u32)>) -> String {
    value
        .map(|(w, h)| format!("{w}x{h}"))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Derive device flags from a user agent string.
pub fn detect_device(user_agent: &str) -> (bool, bool) {
    let ua = user_agent.to_ascii_lowercase();
    let is_mobile = MOBILE_TOKENS.iter().any(|token| ua.contains(token));
    let is_tablet = ua.contains("ipad") || (ua.contains("android") && !ua.contains("mobile"));
    (is_mobile, is_tablet)
}

/// Capture a session snapshot. Missing facts become `"unknown"`; this never fails.
pub fn capture_session(env: &dyn EnvironmentProvider) -> Session {
    let snap = env.snapshot();
    let ua = snap.user_agent.clone().unwrap_or_default();
    let (is_mobile, is_tablet) = detect_device(&ua);
    let language = or_unknown(snap.language.clone());
    let platform = or_unknown(snap.platform.clone());

    let device_info = DeviceInfo {
        is_mobile,
        is_tablet,
        is_desktop: !is_mobile,
        platform: platform.clone(),
        cookie_enabled: snap.cookie_enabled.unwrap_or(false),
        on_line: snap.on_line.unwrap_or(true),
        language: language.clone(),
        languages: snap.languages.clone(),
        hardware_concurrency: snap.hardware_concurrency,
        memory: snap
            .device_memory_gb
            .map(|gb| json!(gb))
            .unwrap_or_else(|| json!(UNKNOWN)),
        connection: snap.connection.clone(),
    };

    let user_agent = UserAgentInfo {
        full: if ua.is_empty() { UNKNOWN.to_string() } else { ua },
        vendor: or_unknown(snap.vendor),
        app_name: or_unknown(snap.app_name),
        app_version: or_unknown(snap.app_version),
        platform,
    };

    Session {
        session_id: Uuid::new_v4(),
        start_time: Utc::now(),
        device_info,
        user_agent,
        url: snap.url.unwrap_or_else(|| env.current_url()),
        referrer: snap.referrer.unwrap_or_default(),
        language,
        timezone: or_unknown(snap.timezone),
        screen_resolution: dimensions(snap.screen),
        viewport_size: dimensions(snap.viewport),
    }
}

/// Capture the session and persist it best-effort.
pub fn init_session(env: &dyn EnvironmentProvider, store: &dyn SessionStore) -> Session {
    let session = capture_session(env);
    match store.save(&session) {
        Ok(()) => debug!(session_id = %session.session_id, "session snapshot persisted"),
        Err(e) => warn!(error = %e, "cannot persist session snapshot"),
    }
    session
}

/// Advisory persistence for the session snapshot. Never a source of truth.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: &Session) -> AnalyticsResult<()>;
    fn load(&self) -> AnalyticsResult<Option<Session>>;
    fn remove(&self) -> AnalyticsResult<()>;
}

/// Stores the snapshot as a JSON file, overwritten on every init.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, session: &Session) -> AnalyticsResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> AnalyticsResult<Option<Session>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self) -> AnalyticsResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keeps the serialized snapshot in memory.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<String>>,
    read_only: bool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects writes, like a browser with storage disabled.
    pub fn read_only() -> Self {
        Self {
            slot: Mutex::new(None),
            read_only: true,
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, session: &Session) -> AnalyticsResult<()> {
        if self.read_only {
            return Err(AnalyticsError::Storage("storage is read-only".into()));
        }
        *self.slot.lock() = Some(serde_json::to_string(session)?);
        Ok(())
    }

    fn load(&self) -> AnalyticsResult<Option<Session>> {
        self.slot
            .lock()
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(Into::into)
    }

    fn remove(&self) -> AnalyticsResult<()> {
        if self.read_only {
            return Err(AnalyticsError::Storage("storage is read-only".into()));
        }
        *self.slot.lock() = None;
        Ok(())
    }
}
