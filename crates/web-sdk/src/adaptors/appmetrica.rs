//! AppMetrica adaptor: imports event batches through the Post API as CSV.

use async_trait::async_trait;
use pulse_core::{AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind, Event};
use tracing::{debug, info};

use crate::transport::HttpTransport;

const CSV_HEADER: &str = "application_id,profile_id,event_name,event_timestamp,event_json";

#[derive(Debug, Clone)]
pub struct AppMetricaConfig {
    pub post_api_key: String,
    pub application_id: Option<String>,
    pub endpoint: String,
}

pub struct AppMetricaAdaptor {
    config: AppMetricaConfig,
    transport: HttpTransport,
}

impl AppMetricaAdaptor {
    pub fn new(config: AppMetricaConfig, transport: HttpTransport) -> Self {
        Self { config, transport }
    }

    fn application_id(&self) -> AnalyticsResult<&str> {
        self.config
            .application_id
            .as_deref()
            .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| AnalyticsError::InvalidCredentials {
                backend: BackendKind::AppMetrica,
                message: "a numeric application id is required".into(),
            })
    }

    /// Render a batch as a Post API CSV document.
    pub fn to_csv(&self, events: &[Event]) -> AnalyticsResult<String> {
        let app_id = self.application_id()?;
        let mut csv = String::from(CSV_HEADER);
        csv.push('\n');
        for event in events {
            let event_json = serde_json::to_string(&event.properties)?;
            let row = [
                app_id,
                event.session_id().unwrap_or_default(),
                event.name.as_str(),
                (event.timestamp_ms() / 1000).to_string().as_str(),
                event_json.as_str(),
            ]
            .map(csv_field)
            .join(",");
            csv.push_str(&row);
            csv.push('\n');
        }
        Ok(csv)
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[async_trait]
impl AnalyticsAdapter for AppMetricaAdaptor {
    fn kind(&self) -> BackendKind {
        BackendKind::AppMetrica
    }

    async fn init(&self) -> AnalyticsResult<()> {
        let app_id = self.application_id()?;
        info!(application_id = %app_id, "AppMetrica adaptor ready");
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        let url = format!(
            "{}/logs/v1/import/events.csv?post_api_key={}&application_id={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.post_api_key,
            self.application_id()?
        );
        let body = self.to_csv(events)?;
        self.transport.post_text(&url, "text/csv", body, &[]).await?;
        debug!(count = events.len(), "AppMetrica events imported");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptors::test_support::{event, transport};
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adaptor(endpoint: &str, app_id: Option<&str>) -> AppMetricaAdaptor {
        AppMetricaAdaptor::new(
            AppMetricaConfig {
                post_api_key: "post-key".into(),
                application_id: app_id.map(str::to_string),
                endpoint: endpoint.into(),
            },
            transport(),
        )
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_rows() {
        let a = adaptor("http://localhost", Some("4242"));
        let csv = a
            .to_csv(&[event("section_view", json!({"sectionName": "hero"}))])
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].starts_with("4242,session-1,section_view,"));
        assert!(lines[1].contains("\"\"sectionName\"\":\"\"hero\"\""));
    }

    #[tokio::test]
    async fn test_init_requires_app_id() {
        assert!(adaptor("http://localhost", None).init().await.is_err());
        assert!(adaptor("http://localhost", Some("4242")).init().await.is_ok());
    }

    #[tokio::test]
    async fn test_batch_posted_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs/v1/import/events.csv"))
            .and(query_param("post_api_key", "post-key"))
            .and(body_string_contains("page_view"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let a = adaptor(&server.uri(), Some("4242"));
        a.send_events(&[event("page_view", json!({})), event("click", json!({}))])
            .await
            .unwrap();
    }
}
