use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::BackendKind;

/// Root orchestrator configuration. Loaded from environment variables
/// with the prefix `PULSE__` and an optional TOML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_size_check_interval_ms")]
    pub size_check_interval_ms: u64,
    #[serde(default = "default_flush_throttle_ms")]
    pub flush_throttle_ms: u64,
    #[serde(default = "default_init_debounce_ms")]
    pub init_debounce_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    #[serde(default = "default_session_storage_key")]
    pub session_storage_key: String,
    #[serde(default)]
    pub backends: BackendCredentials,
}

/// Per-backend credentials. A backend is registered only when its
/// credential is present; `internal` is always registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendCredentials {
    #[serde(default)]
    pub ga_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub ga_api_secret: Option<String>,
    #[serde(default = "default_ga_endpoint")]
    pub ga_endpoint: String,
    #[serde(default)]
    pub yandex_metrica_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub yandex_measurement_secret: Option<String>,
    #[serde(default = "default_yandex_endpoint")]
    pub yandex_endpoint: String,
    #[serde(default, skip_serializing)]
    pub sentry_dsn: Option<String>,
    #[serde(default, skip_serializing)]
    pub appmetrica_key: Option<String>,
    #[serde(default)]
    pub appmetrica_app_id: Option<String>,
    #[serde(default = "default_appmetrica_endpoint")]
    pub appmetrica_endpoint: String,
    #[serde(default)]
    pub openreplay_key: Option<String>,
    #[serde(default = "default_openreplay_endpoint")]
    pub openreplay_endpoint: String,
    #[serde(default)]
    pub hotjar_id: Option<String>,
    #[serde(default = "default_hotjar_endpoint")]
    pub hotjar_endpoint: String,
    #[serde(default = "default_internal_endpoint")]
    pub internal_endpoint: String,
    #[serde(default)]
    pub build_id: Option<String>,
}

impl BackendCredentials {
    /// Credential that gates registration of the given backend.
    pub fn gate(&self, backend: BackendKind) -> Option<&str> {
        let value = match backend {
            BackendKind::GoogleAnalytics => self.ga_id.as_deref(),
            BackendKind::YandexMetrica => self.yandex_metrica_id.as_deref(),
            BackendKind::Sentry => self.sentry_dsn.as_deref(),
            BackendKind::AppMetrica => self.appmetrica_key.as_deref(),
            BackendKind::OpenReplay => self.openreplay_key.as_deref(),
            BackendKind::Hotjar => self.hotjar_id.as_deref(),
            BackendKind::Internal => Some(self.internal_endpoint.as_str()),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn is_enabled(&self, backend: BackendKind) -> bool {
        backend == BackendKind::Internal || self.gate(backend).is_some()
    }

    /// Backends that will be attempted at registration, in registration order.
    pub fn enabled_backends(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }
}

// Default functions
fn default_enabled() -> bool {
    true
}
fn default_batch_size() -> usize {
    10
}
fn default_flush_interval_ms() -> u64 {
    5000
}
fn default_size_check_interval_ms() -> u64 {
    1000
}
fn default_flush_throttle_ms() -> u64 {
    1000
}
fn default_init_debounce_ms() -> u64 {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from(".pulse")
}
fn default_session_storage_key() -> String {
    "pulse_session".to_string()
}
fn default_ga_endpoint() -> String {
    "https://www.google-analytics.com".to_string()
}
fn default_yandex_endpoint() -> String {
    "https://mc.yandex.ru".to_string()
}
fn default_appmetrica_endpoint() -> String {
    "https://api.appmetrica.yandex.ru".to_string()
}
fn default_openreplay_endpoint() -> String {
    "https://api.openreplay.com".to_string()
}
fn default_hotjar_endpoint() -> String {
    "https://insights.hotjar.com".to_string()
}
fn default_internal_endpoint() -> String {
    "http://localhost:3000".to_string()
}

impl Default for BackendCredentials {
    fn default() -> Self {
        Self {
            ga_id: None,
            ga_api_secret: None,
            ga_endpoint: default_ga_endpoint(),
            yandex_metrica_id: None,
            yandex_measurement_secret: None,
            yandex_endpoint: default_yandex_endpoint(),
            sentry_dsn: None,
            appmetrica_key: None,
            appmetrica_app_id: None,
            appmetrica_endpoint: default_appmetrica_endpoint(),
            openreplay_key: None,
            openreplay_endpoint: default_openreplay_endpoint(),
            hotjar_id: None,
            hotjar_endpoint: default_hotjar_endpoint(),
            internal_endpoint: default_internal_endpoint(),
            build_id: None,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            debug: false,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            size_check_interval_ms: default_size_check_interval_ms(),
            flush_throttle_ms: default_flush_throttle_ms(),
            init_debounce_ms: default_init_debounce_ms(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            storage_dir: default_storage_dir(),
            session_storage_key: default_session_storage_key(),
            backends: BackendCredentials::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from an optional TOML file, overridden by
    /// `PULSE__*` environment variables.
    pub fn load_from(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PULSE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Collection is active when enabled, or always in debug mode.
    pub fn is_collecting(&self) -> bool {
        self.enabled || self.debug
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn size_check_interval(&self) -> Duration {
        Duration::from_millis(self.size_check_interval_ms)
    }

    pub fn flush_throttle(&self) -> Duration {
        Duration::from_millis(self.flush_throttle_ms)
    }

    pub fn init_debounce(&self) -> Duration {
        Duration::from_millis(self.init_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay before re-flushing events that failed `attempts` times.
    /// Doubles per attempt, capped at ten seconds.
    pub fn retry_delay(&self, attempts: u32) -> Duration {
        let factor = 1u64 << attempts.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor).min(10_000))
    }

    /// The scheduling flags and enabled backends, without credentials.
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            enabled: self.enabled,
            debug: self.debug,
            batch_size: self.batch_size,
            flush_interval_ms: self.flush_interval_ms,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            backends: self.backends.enabled_backends(),
        }
    }

    /// Path of the persisted session snapshot.
    pub fn session_path(&self) -> PathBuf {
        self.storage_dir
            .join(format!("{}.json", self.session_storage_key))
    }
}

/// Credential-free view of [`AnalyticsConfig`] for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    pub enabled: bool,
    pub debug: bool,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backends: Vec<BackendKind>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyticsConfig::default();
        assert!(config.enabled);
        assert!(!config.debug);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.size_check_interval(), Duration::from_secs(1));
        assert_eq!(config.flush_throttle(), Duration::from_secs(1));
        assert_eq!(config.init_debounce(), Duration::from_millis(100));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
    }

    #[test]
    fn test_deserialize_empty_uses_defaults() {
        let config: AnalyticsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.session_storage_key, "pulse_session");
        assert_eq!(config.backends.internal_endpoint, "http://localhost:3000");
    }

    #[test]
    fn test_is_collecting() {
        let mut config = AnalyticsConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(!config.is_collecting());
        config.debug = true;
        assert!(config.is_collecting());
    }

    #[test]
    fn test_retry_delay_backoff() {
        let config = AnalyticsConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(1000));
        assert_eq!(config.retry_delay(2), Duration::from_millis(2000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(4000));
        assert_eq!(config.retry_delay(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_backend_gates() {
        let creds = BackendCredentials {
            ga_id: Some("G-TEST".into()),
            sentry_dsn: Some("   ".into()),
            hotjar_id: Some("12345".into()),
            ..Default::default()
        };
        assert_eq!(
            creds.enabled_backends(),
            vec![
                BackendKind::GoogleAnalytics,
                BackendKind::Hotjar,
                BackendKind::Internal
            ]
        );
        assert!(!creds.is_enabled(BackendKind::Sentry));
    }

    #[test]
    fn test_session_path() {
        let config = AnalyticsConfig {
            storage_dir: PathBuf::from("/tmp/pulse"),
            ..Default::default()
        };
        assert_eq!(config.session_path(), PathBuf::from("/tmp/pulse/pulse_session.json"));
    }

    #[test]
    fn test_secrets_are_never_serialized() {
        let mut config = AnalyticsConfig::default();
        config.backends.ga_id = Some("G-VISIBLE".into());
        config.backends.ga_api_secret = Some("ga-secret-value".into());
        config.backends.yandex_measurement_secret = Some("ym-secret-value".into());
        config.backends.sentry_dsn = Some("https://dsn-secret@o1.ingest.sentry.io/2".into());
        config.backends.appmetrica_key = Some("am-secret-value".into());

        for json in [
            serde_json::to_string(&config).unwrap(),
            serde_json::to_string(&config.summary()).unwrap(),
        ] {
            assert!(!json.contains("secret"), "{json}");
        }
        assert_eq!(
            config.summary().backends,
            [
                BackendKind::GoogleAnalytics,
                BackendKind::Sentry,
                BackendKind::Internal
            ]
        );
    }
}
