//! Internal analytics adaptor: the always-on system of record. Events are
//! grouped by name and posted to the first-party analytics API.

use async_trait::async_trait;
use chrono::Utc;
use pulse_core::{AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind, Event, Session};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::HttpTransport;

const SOURCE_HEADER: &str = "pulse-web";

/// Static context stamped onto every forwarded event.
#[derive(Debug, Clone)]
pub struct InternalContext {
    pub session_id: Uuid,
    pub referrer: String,
    pub language: String,
    pub timezone: String,
    pub user_agent: String,
    pub build_id: String,
}

impl InternalContext {
    pub fn from_session(session: &Session, build_id: Option<&str>) -> Self {
        Self {
            session_id: session.session_id,
            referrer: session.referrer.clone(),
            language: session.language.clone(),
            timezone: session.timezone.clone(),
            user_agent: session.user_agent.full.clone(),
            build_id: build_id.unwrap_or("unknown").to_string(),
        }
    }
}

pub struct InternalAdaptor {
    endpoint: String,
    context: InternalContext,
    transport: HttpTransport,
}

impl InternalAdaptor {
    pub fn new(endpoint: impl Into<String>, context: InternalContext, transport: HttpTransport) -> Self {
        Self {
            endpoint: endpoint.into(),
            context,
            transport,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    /// Group events by name, keeping first-appearance order of the groups
    /// and FIFO order inside each group.
    pub fn group_by_type(events: &[Event]) -> Vec<(&str, Vec<&Event>)> {
        let mut groups: Vec<(&str, Vec<&Event>)> = Vec::new();
        for event in events {
            match groups.iter_mut().find(|(name, _)| *name == event.name) {
                Some((_, group)) => group.push(event),
                None => groups.push((event.name.as_str(), vec![event])),
            }
        }
        groups
    }

    /// Reshape an event for the internal API, adding a per-type `analytics` block.
    pub fn transform(&self, event: &Event) -> Value {
        let p = |key: &str| event.prop(key).cloned().unwrap_or(Value::Null);

        let mut properties = event.properties.clone();
        properties.insert("platform".into(), json!("web"));
        properties.insert("version".into(), json!(env!("CARGO_PKG_VERSION")));
        properties.insert("build".into(), json!(self.context.build_id));

        let mut transformed = json!({
            "id": event.id,
            "name": event.name,
            "timestamp": event.timestamp_ms(),
            "sessionId": p("sessionId"),
            "properties": properties,
            "context": {
                "url": p("url"),
                "userAgent": p("userAgent"),
                "deviceInfo": p("deviceInfo"),
                "referrer": self.context.referrer,
                "language": self.context.language,
                "timezone": self.context.timezone,
            },
            "options": event.options,
            "attempts": event.attempts,
        });

        let severity = if event.str_prop("type") == Some("javascript_error") {
            "high"
        } else {
            "medium"
        };
        let analytics = match event.name.as_str() {
            "swipe_navigation" => Some(json!({
                "category": "navigation",
                "action": "swipe",
                "label": format!(
                    "{}->{}",
                    event.str_prop("fromSection").unwrap_or_default(),
                    event.str_prop("toSection").unwrap_or_default()
                ),
                "value": p("toSection"),
            })),
            "section_view" => Some(json!({
                "category": "page_view",
                "action": "view_section",
                "label": p("sectionName"),
                "value": p("sectionIndex"),
                "duration": p("duration"),
            })),
            "performance_metric" => Some(json!({
                "category": "performance",
                "action": "metric",
                "label": p("metric"),
                "value": event.f64_prop("duration").unwrap_or(0.0).round() as i64,
                "type": p("type"),
            })),
            "error" => Some(json!({
                "category": "error",
                "action": p("type"),
                "label": event.str_prop("message").unwrap_or("Unknown error"),
                "severity": severity,
            })),
            "roi_calculation" => Some(json!({
                "category": "conversion",
                "action": "roi_calculation",
                "label": format!(
                    "{}-{}",
                    event.str_prop("businessSize").unwrap_or_default(),
                    event.str_prop("industry").unwrap_or_default()
                ),
                "value": event.f64_prop("estimatedROI").unwrap_or(0.0),
                "lead_data": {
                    "businessSize": p("businessSize"),
                    "industry": p("industry"),
                    "budget": p("budget"),
                },
            })),
            "ai_interaction" => Some(json!({
                "category": "ai_engagement",
                "action": p("type"),
                "label": p("model"),
                "value": p("responseTime"),
                "satisfaction": p("satisfaction"),
            })),
            _ => None,
        };
        if let Some(analytics) = analytics {
            transformed["analytics"] = analytics;
        }
        transformed
    }

    async fn send_group(&self, event_type: &str, events: &[&Event]) -> AnalyticsResult<()> {
        let batch_id = format!("batch_{}", Uuid::new_v4().simple());
        let payload = json!({
            "eventType": event_type,
            "events": events.iter().map(|e| self.transform(e)).collect::<Vec<_>>(),
            "metadata": {
                "timestamp": Utc::now().timestamp_millis(),
                "batchId": batch_id,
                "userAgent": self.context.user_agent,
                "platform": "web",
            },
        });

        self.transport
            .post_json(
                &self.url("/api/analytics/events"),
                &payload,
                &[
                    ("x-analytics-source", SOURCE_HEADER.to_string()),
                    ("x-batch-size", events.len().to_string()),
                ],
            )
            .await?;
        debug!(event_type, count = events.len(), batch_id = %batch_id, "internal batch sent");
        Ok(())
    }
}

#[async_trait]
impl AnalyticsAdapter for InternalAdaptor {
    fn kind(&self) -> BackendKind {
        BackendKind::Internal
    }

    async fn init(&self) -> AnalyticsResult<()> {
        // An unreachable API is not fatal: events retry through the queue.
        match self.transport.get(&self.url("/api/analytics/health")).await {
            Ok(_) => info!(endpoint = %self.endpoint, "internal analytics API healthy"),
            Err(e) => warn!(endpoint = %self.endpoint, error = %e, "internal analytics API not available"),
        }
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        let mut accepted = Vec::new();
        for (event_type, group) in Self::group_by_type(events) {
            if let Err(e) = self.send_group(event_type, &group).await {
                return Err(AnalyticsError::partial(accepted, e));
            }
            accepted.extend(group.iter().map(|e| e.id));
        }
        Ok(())
    }

    async fn clear_data(&self) -> AnalyticsResult<()> {
        self.transport
            .post_json(
                &self.url("/api/analytics/clear-data"),
                &json!({ "sessionId": self.context.session_id }),
                &[],
            )
            .await?;
        info!(session_id = %self.context.session_id, "internal analytics data cleared");
        Ok(())
    }
}
