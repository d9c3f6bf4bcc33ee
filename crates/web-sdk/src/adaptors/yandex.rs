//! Yandex Metrica adaptor: forwards events through the Metrica
//! Measurement Protocol (`/collect`), one hit per event.

use async_trait::async_trait;
use pulse_core::{AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind, Event};
use tracing::{debug, info};

use crate::transport::HttpTransport;

#[derive(Debug, Clone)]
pub struct YandexConfig {
    /// Numeric Metrica counter id.
    pub counter_id: String,
    /// Measurement Protocol token (`ms`), if the counter requires one.
    pub measurement_secret: Option<String>,
    pub endpoint: String,
}

pub struct YandexMetricaAdaptor {
    config: YandexConfig,
    transport: HttpTransport,
}

impl YandexMetricaAdaptor {
    pub fn new(config: YandexConfig, transport: HttpTransport) -> Self {
        Self { config, transport }
    }

    /// Form fields for one Measurement Protocol hit.
    pub fn hit_params(&self, event: &Event) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("tid", self.config.counter_id.clone()),
            ("cid", event.session_id().unwrap_or("anonymous").to_string()),
            ("et", (event.timestamp_ms() / 1000).to_string()),
        ];

        if event.name == "page_view" {
            params.push(("t", "pageview".into()));
            let location = event
                .str_prop("page")
                .filter(|page| page.starts_with("http"))
                .or(event.str_prop("url"))
                .unwrap_or_default();
            params.push(("dl", location.to_string()));
            if let Some(title) = event.str_prop("title") {
                params.push(("dt", title.to_string()));
            }
            if let Some(referrer) = event.str_prop("referrer").filter(|r| !r.is_empty()) {
                params.push(("dr", referrer.to_string()));
            }
        } else {
            params.push(("t", "event".into()));
            params.push(("ea", event.name.clone()));
            params.push(("ec", category(event).to_string()));
            if let Some(url) = event.str_prop("url") {
                params.push(("dl", url.to_string()));
            }
            let label = event
                .str_prop("type")
                .or(event.str_prop("sectionName"))
                .or(event.str_prop("metric"));
            if let Some(label) = label {
                params.push(("el", label.to_string()));
            }
        }

        if let Some(ref secret) = self.config.measurement_secret {
            params.push(("ms", secret.clone()));
        }
        params
    }
}

fn category(event: &Event) -> &'static str {
    match event.name.as_str() {
        "swipe_navigation" | "section_view" => "navigation",
        "performance_metric" => "performance",
        "error" => "error",
        "roi_calculation" | "form_submission" => "conversion",
        _ => "engagement",
    }
}

#[async_trait]
impl AnalyticsAdapter for YandexMetricaAdaptor {
    fn kind(&self) -> BackendKind {
        BackendKind::YandexMetrica
    }

    async fn init(&self) -> AnalyticsResult<()> {
        if self.config.counter_id.is_empty()
            || !self.config.counter_id.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AnalyticsError::InvalidCredentials {
                backend: BackendKind::YandexMetrica,
                message: format!("counter id must be numeric, got '{}'", self.config.counter_id),
            });
        }
        info!(counter_id = %self.config.counter_id, "Yandex Metrica adaptor ready");
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        let url = format!("{}/collect", self.config.endpoint.trim_end_matches('/'));
        for (sent, event) in events.iter().enumerate() {
            if let Err(e) = self.transport.post_form(&url, &self.hit_params(event)).await {
                let accepted = events[..sent].iter().map(|e| e.id).collect();
                return Err(AnalyticsError::partial(accepted, e));
            }
        }
        debug!(count = events.len(), "Yandex Metrica hits sent");
        Ok(())
    }
}
