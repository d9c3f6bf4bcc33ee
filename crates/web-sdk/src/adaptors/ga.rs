//! Google Analytics 4 (GA4) Measurement Protocol adaptor: maps tracked
//! events onto GA4 recommended events and forwards them server-side.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use pulse_core::{
    AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind, Event,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::{device_category, origin_of};
use crate::transport::HttpTransport;

/// GA4 accepts at most 25 events per Measurement Protocol request.
const MAX_EVENTS_PER_REQUEST: usize = 25;

/// Configuration for the GA4 adaptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaConfig {
    /// GA4 Measurement ID, e.g. "G-XXXXXXXXXX".
    pub measurement_id: String,
    /// API secret for Measurement Protocol server-side hits.
    pub api_secret: String,
    pub endpoint: String,
    /// Route hits to the validation endpoint.
    pub debug_mode: bool,
}

impl Default for GaConfig {
    fn default() -> Self {
        Self {
            measurement_id: String::new(),
            api_secret: String::new(),
            endpoint: "https://www.google-analytics.com".to_string(),
            debug_mode: false,
        }
    }
}

/// Google Analytics 4 adaptor using the Measurement Protocol format.
pub struct GaAdaptor {
    config: GaConfig,
    transport: HttpTransport,
    consent_revoked: AtomicBool,
}

impl GaAdaptor {
    pub fn new(config: GaConfig, transport: HttpTransport) -> Self {
        Self {
            config,
            transport,
            consent_revoked: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GaConfig {
        &self.config
    }

    pub fn validate_config(&self) -> AnalyticsResult<()> {
        let invalid = |message: String| AnalyticsError::InvalidCredentials {
            backend: BackendKind::GoogleAnalytics,
            message,
        };
        if self.config.measurement_id.is_empty() {
            return Err(invalid("measurement_id must not be empty".into()));
        }
        if !self.config.measurement_id.starts_with("G-") {
            return Err(invalid(format!(
                "measurement_id must start with 'G-', got '{}'",
                self.config.measurement_id
            )));
        }
        if self.config.api_secret.is_empty() {
            return Err(invalid("api_secret must not be empty".into()));
        }
        Ok(())
    }

    fn collect_url(&self) -> String {
        let path = if self.config.debug_mode {
            "debug/mp/collect"
        } else {
            "mp/collect"
        };
        format!(
            "{}/{}?measurement_id={}&api_secret={}",
            self.config.endpoint.trim_end_matches('/'),
            path,
            self.config.measurement_id,
            self.config.api_secret
        )
    }

    /// Map one tracked event to one or more GA4 events.
    pub fn map_event(event: &Event) -> Vec<Value> {
        let p = |key: &str| event.prop(key).cloned().unwrap_or(Value::Null);
        let mut params = json!({
            "event_category": "engagement",
            "event_label": event.name,
            "session_id": p("sessionId"),
            "timestamp": event.timestamp_ms(),
            "custom_parameter_4": device_category(event),
        });

        let (name, extra, ecommerce): (&str, Value, Option<Value>) = match event.name.as_str() {
            "swipe_navigation" => (
                "swipe_navigation",
                json!({
                    "event_category": "navigation",
                    "swipe_direction": p("direction"),
                    "from_section": p("fromSection"),
                    "to_section": p("toSection"),
                    "navigation_method": p("method"),
                    "custom_parameter_1": p("toSection"),
                    "custom_parameter_2": p("direction"),
                    "custom_parameter_3": p("method"),
                }),
                None,
            ),
            "section_view" => {
                let origin = event.str_prop("url").and_then(origin_of).unwrap_or_default();
                (
                    "page_view",
                    json!({
                        "event_category": "page_view",
                        "page_title": p("sectionName"),
                        "page_location": format!("{}/section/{}", origin, p("sectionIndex")),
                        "section_name": p("sectionName"),
                        "section_index": p("sectionIndex"),
                        "view_duration": p("duration"),
                        "custom_parameter_1": p("sectionName"),
                        "custom_parameter_5": p("sectionIndex"),
                    }),
                    None,
                )
            }
            "performance_metric" => (
                "timing_complete",
                json!({
                    "event_category": "performance",
                    "name": p("metric"),
                    "value": event.f64_prop("duration").unwrap_or(0.0).round() as i64,
                    "metric_type": p("type"),
                    "start_time": p("startTime"),
                }),
                None,
            ),
            "error" => (
                "exception",
                json!({
                    "event_category": "error",
                    "description": event.str_prop("message").or(event.str_prop("type")),
                    "fatal": event.str_prop("type") == Some("javascript_error"),
                    "error_type": p("type"),
                    "filename": p("filename"),
                    "line_number": p("lineno"),
                }),
                None,
            ),
            "roi_calculation" => {
                let value = event.f64_prop("estimatedROI").unwrap_or(0.0);
                (
                    "generate_lead",
                    json!({
                        "event_category": "conversion",
                        "currency": "RUB",
                        "value": value,
                        "business_size": p("businessSize"),
                        "industry": p("industry"),
                        "budget": p("budget"),
                    }),
                    Some(json!({
                        "name": "purchase",
                        "params": {
                            "transaction_id": p("calculationId"),
                            "value": value,
                            "currency": "RUB",
                            "items": [{
                                "item_id": "roi_calculation",
                                "item_name": "ROI Calculator Result",
                                "item_category": "lead_generation",
                                "quantity": 1,
                                "price": value,
                            }],
                        },
                    })),
                )
            }
            "ai_interaction" => (
                "ai_interaction",
                json!({
                    "event_category": "ai_engagement",
                    "interaction_type": p("type"),
                    "ai_model": p("model"),
                    "response_time": p("responseTime"),
                    "message_length": p("messageLength"),
                    "satisfaction_score": p("satisfaction"),
                }),
                None,
            ),
            "form_submission" => (
                "form_submit",
                json!({
                    "event_category": "form",
                    "form_name": p("formName"),
                    "form_section": p("section"),
                    "completion_time": p("completionTime"),
                    "field_count": p("fieldCount"),
                }),
                None,
            ),
            other => (other, Value::Object(event.properties.clone()), None),
        };

        if let (Some(obj), Value::Object(extra)) = (params.as_object_mut(), extra) {
            for (key, value) in extra {
                obj.insert(key, value);
            }
        }

        let mut out = vec![json!({ "name": name, "params": params })];
        out.extend(ecommerce);
        out
    }

    /// Build the Measurement Protocol requests for a batch. A tracked event
    /// never straddles two requests, even when it maps to several GA events.
    pub fn build_payloads(&self, events: &[Event]) -> Vec<MpRequest> {
        let client_id = events
            .iter()
            .find_map(|e| e.session_id())
            .unwrap_or("anonymous")
            .to_string();
        let timestamp_micros = events
            .first()
            .map(|e| e.timestamp_ms() * 1000)
            .unwrap_or_default();
        let body = |ga_events: Vec<Value>| {
            json!({
                "client_id": client_id,
                "timestamp_micros": timestamp_micros.to_string(),
                "non_personalized_ads": true,
                "events": ga_events,
            })
        };

        let mut requests = Vec::new();
        let mut event_ids = Vec::new();
        let mut ga_events: Vec<Value> = Vec::new();
        for event in events {
            let mapped = Self::map_event(event);
            if !ga_events.is_empty() && ga_events.len() + mapped.len() > MAX_EVENTS_PER_REQUEST {
                requests.push(MpRequest {
                    event_ids: std::mem::take(&mut event_ids),
                    body: body(std::mem::take(&mut ga_events)),
                });
            }
            event_ids.push(event.id);
            ga_events.extend(mapped);
        }
        if !ga_events.is_empty() {
            requests.push(MpRequest {
                event_ids,
                body: body(ga_events),
            });
        }
        requests
    }
}

/// One Measurement Protocol request and the tracked events it carries.
#[derive(Debug, Clone)]
pub struct MpRequest {
    pub event_ids: Vec<Uuid>,
    pub body: Value,
}

#[async_trait]
impl AnalyticsAdapter for GaAdaptor {
    fn kind(&self) -> BackendKind {
        BackendKind::GoogleAnalytics
    }

    async fn init(&self) -> AnalyticsResult<()> {
        self.validate_config()?;
        info!(measurement_id = %self.config.measurement_id, "GA4 adaptor ready");
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        if self.consent_revoked.load(Ordering::SeqCst) {
            debug!(count = events.len(), "GA4 consent revoked, discarding events");
            return Ok(());
        }
        let url = self.collect_url();
        let mut accepted = Vec::new();
        for request in self.build_payloads(events) {
            if let Err(e) = self.transport.post_json(&url, &request.body, &[]).await {
                return Err(AnalyticsError::partial(accepted, e));
            }
            accepted.extend(request.event_ids);
        }
        debug!(count = events.len(), "GA4 events sent");
        Ok(())
    }

    async fn clear_data(&self) -> AnalyticsResult<()> {
        self.consent_revoked.store(true, Ordering::SeqCst);
        info!("GA4 analytics storage consent revoked");
        Ok(())
    }
}
