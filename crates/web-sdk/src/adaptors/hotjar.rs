//! Hotjar adaptor: Hotjar events are name-only tags used to filter
//! recordings and heatmaps, so only sanitized event names are forwarded.

use async_trait::async_trait;
use pulse_core::{AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind, Event};
use serde_json::json;
use tracing::{debug, info};

use crate::transport::HttpTransport;

const MAX_EVENT_NAME_LEN: usize = 250;

pub struct HotjarAdaptor {
    site_id: String,
    endpoint: String,
    transport: HttpTransport,
}

impl HotjarAdaptor {
    pub fn new(site_id: impl Into<String>, endpoint: impl Into<String>, transport: HttpTransport) -> Self {
        Self {
            site_id: site_id.into(),
            endpoint: endpoint.into(),
            transport,
        }
    }

    /// Hotjar accepts letters, digits, `_` and `-` only.
    pub fn tag_name(event: &Event) -> String {
        let mut tag: String = event
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        tag.truncate(MAX_EVENT_NAME_LEN);
        tag
    }
}

#[async_trait]
impl AnalyticsAdapter for HotjarAdaptor {
    fn kind(&self) -> BackendKind {
        BackendKind::Hotjar
    }

    async fn init(&self) -> AnalyticsResult<()> {
        if !self.site_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(AnalyticsError::InvalidCredentials {
                backend: BackendKind::Hotjar,
                message: format!("site id must be numeric, got '{}'", self.site_id),
            });
        }
        info!(site_id = %self.site_id, "Hotjar adaptor ready");
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        let tags: Vec<_> = events
            .iter()
            .map(|e| json!({ "name": Self::tag_name(e), "timestamp": e.timestamp_ms() }))
            .collect();
        let url = format!(
            "{}/api/v2/sites/{}/events",
            self.endpoint.trim_end_matches('/'),
            self.site_id
        );
        let session_id = events.iter().find_map(|e| e.session_id());
        self.transport
            .post_json(&url, &json!({ "sessionId": session_id, "events": tags }), &[])
            .await?;
        debug!(count = events.len(), "Hotjar events tagged");
        Ok(())
    }
}
