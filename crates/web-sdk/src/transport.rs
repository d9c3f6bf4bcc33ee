//! Shared HTTP transport for the backend adaptors.

use std::time::Duration;

use pulse_core::{AnalyticsError, AnalyticsResult};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{RequestBuilder, Response, StatusCode};
use tracing::debug;

/// Thin wrapper over a pooled `reqwest::Client` that turns non-success
/// responses into [`AnalyticsError`]s.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> AnalyticsResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    pub async fn get(&self, url: &str) -> AnalyticsResult<Response> {
        self.execute(self.client.get(url)).await
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        headers: &[(&'static str, String)],
    ) -> AnalyticsResult<Response> {
        let request = self
            .client
            .post(url)
            .headers(to_header_map(headers)?)
            .json(body);
        self.execute(request).await
    }

    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, String)],
    ) -> AnalyticsResult<Response> {
        self.execute(self.client.post(url).form(form)).await
    }

    pub async fn post_text(
        &self,
        url: &str,
        content_type: &'static str,
        body: String,
        headers: &[(&'static str, String)],
    ) -> AnalyticsResult<Response> {
        let request = self
            .client
            .post(url)
            .headers(to_header_map(headers)?)
            .header(CONTENT_TYPE, content_type)
            .body(body);
        self.execute(request).await
    }

    async fn execute(&self, request: RequestBuilder) -> AnalyticsResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "backend responded");

        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(AnalyticsError::RateLimited { retry_after_secs });
        }
        let message = response.text().await.unwrap_or_default();
        Err(AnalyticsError::ServerError {
            status: status.as_u16(),
            message,
        })
    }
}

fn to_header_map(headers: &[(&'static str, String)]) -> AnalyticsResult<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let invalid = |e: &dyn std::fmt::Display| {
            AnalyticsError::Config(format!("invalid header {name}: {e}"))
        };
        let header = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(&e))?;
        let value = HeaderValue::from_str(value).map_err(|e| invalid(&e))?;
        map.insert(header, value);
    }
    Ok(map)
}
