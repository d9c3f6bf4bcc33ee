//! OpenReplay adaptor: attaches tracked events to the replay session as
//! custom events through the project's ingestion endpoint.

use async_trait::async_trait;
use pulse_core::{AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind, Event};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::transport::HttpTransport;

pub struct OpenReplayAdaptor {
    project_key: String,
    endpoint: String,
    transport: HttpTransport,
}

impl OpenReplayAdaptor {
    pub fn new(
        project_key: impl Into<String>,
        endpoint: impl Into<String>,
        transport: HttpTransport,
    ) -> Self {
        Self {
            project_key: project_key.into(),
            endpoint: endpoint.into(),
            transport,
        }
    }

    fn events_url(&self) -> String {
        format!(
            "{}/v1/{}/events",
            self.endpoint.trim_end_matches('/'),
            self.project_key
        )
    }

    pub fn build_payload(events: &[Event]) -> Value {
        let session_id = events.iter().find_map(|e| e.session_id());
        let custom: Vec<Value> = events
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "payload": e.properties,
                    "timestamp": e.timestamp_ms(),
                })
            })
            .collect();
        json!({ "sessionId": session_id, "events": custom })
    }
}

#[async_trait]
impl AnalyticsAdapter for OpenReplayAdaptor {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenReplay
    }

    async fn init(&self) -> AnalyticsResult<()> {
        if !self.project_key.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AnalyticsError::InvalidCredentials {
                backend: BackendKind::OpenReplay,
                message: "project key must be alphanumeric".into(),
            });
        }
        info!("OpenReplay adaptor ready");
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        let payload = Self::build_payload(events);
        self.transport
            .post_json(&self.events_url(), &payload, &[])
            .await?;
        debug!(count = events.len(), "OpenReplay custom events sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptors::test_support::{event, transport};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_payload_shape() {
        let payload = OpenReplayAdaptor::build_payload(&[event("click", json!({"target": "cta"}))]);
        assert_eq!(payload["sessionId"], "session-1");
        assert_eq!(payload["events"][0]["name"], "click");
        assert_eq!(payload["events"][0]["payload"]["target"], "cta");
    }

    #[tokio::test]
    async fn test_init_rejects_bad_key() {
        let adaptor = OpenReplayAdaptor::new("bad key!", "http://localhost", transport());
        assert!(adaptor.init().await.is_err());
    }

    #[tokio::test]
    async fn test_send_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/proj42/events"))
            .and(body_partial_json(json!({"sessionId": "session-1"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adaptor = OpenReplayAdaptor::new("proj42", server.uri(), transport());
        adaptor.init().await.unwrap();
        adaptor
            .send_events(&[event("a", json!({})), event("b", json!({}))])
            .await
            .unwrap();
    }
}
