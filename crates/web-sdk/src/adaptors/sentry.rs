//! Sentry adaptor: forwards `error` events as Sentry envelopes. Every other
//! event kind is accepted and ignored.

use async_trait::async_trait;
use pulse_core::{AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind, Event};
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use crate::transport::HttpTransport;

const ENVELOPE_CONTENT_TYPE: &str = "application/x-sentry-envelope";

/// A parsed Sentry DSN: `{scheme}://{public_key}@{host}[:port]/{path/}{project_id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentryDsn {
    pub raw: String,
    pub public_key: String,
    pub project_id: String,
    envelope_url: String,
}

impl SentryDsn {
    pub fn parse(dsn: &str) -> AnalyticsResult<Self> {
        let invalid = |message: &str| AnalyticsError::InvalidCredentials {
            backend: BackendKind::Sentry,
            message: message.to_string(),
        };
        let url = Url::parse(dsn).map_err(|e| invalid(&format!("malformed DSN: {e}")))?;

        let public_key = url.username();
        if public_key.is_empty() {
            return Err(invalid("DSN is missing the public key"));
        }
        let host = url.host_str().ok_or_else(|| invalid("DSN is missing a host"))?;

        let path = url.path().trim_matches('/');
        let (prefix, project_id) = match path.rsplit_once('/') {
            Some((prefix, id)) => (format!("/{prefix}"), id),
            None => (String::new(), path),
        };
        if project_id.is_empty() || !project_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("DSN project id must be numeric"));
        }

        let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
        let envelope_url = format!(
            "{}://{}{}{}/api/{}/envelope/",
            url.scheme(),
            host,
            port,
            prefix,
            project_id
        );

        Ok(Self {
            raw: dsn.to_string(),
            public_key: public_key.to_string(),
            project_id: project_id.to_string(),
            envelope_url,
        })
    }

    pub fn envelope_url(&self) -> &str {
        &self.envelope_url
    }

    pub fn auth_header(&self) -> String {
        format!(
            "Sentry sentry_version=7, sentry_key={}, sentry_client=pulse/{}",
            self.public_key,
            env!("CARGO_PKG_VERSION")
        )
    }
}

pub struct SentryAdaptor {
    dsn_source: String,
    dsn: parking_lot::RwLock<Option<SentryDsn>>,
    transport: HttpTransport,
}

impl SentryAdaptor {
    pub fn new(dsn: impl Into<String>, transport: HttpTransport) -> Self {
        Self {
            dsn_source: dsn.into(),
            dsn: parking_lot::RwLock::new(None),
            transport,
        }
    }

    /// Build the Sentry event body for an `error` event.
    pub fn to_sentry_event(event: &Event) -> Value {
        let error_type = event.str_prop("type").unwrap_or("error");
        let message = event.str_prop("message").unwrap_or(error_type);
        let level = if error_type == "javascript_error" {
            "fatal"
        } else {
            "error"
        };

        let user_agent = event.prop("userAgent").and_then(|ua| {
            ua.as_str()
                .or_else(|| ua.get("full").and_then(|full| full.as_str()))
        });

        let mut exception = json!({ "type": error_type, "value": message });
        if let Some(stack) = event.str_prop("stack") {
            exception["stacktrace"] = json!({ "frames": [{ "function": stack }] });
        }

        json!({
            "event_id": event.id.simple().to_string(),
            "timestamp": event.timestamp_ms() as f64 / 1000.0,
            "platform": "other",
            "level": level,
            "logger": "pulse",
            "message": { "formatted": message },
            "exception": { "values": [exception] },
            "tags": {
                "session_id": event.session_id(),
                "error_type": error_type,
            },
            "request": {
                "url": event.str_prop("url"),
                "headers": { "User-Agent": user_agent },
            },
            "extra": event.properties,
        })
    }

    async fn post_envelope(&self, dsn: &SentryDsn, auth: &str, event: &Event) -> AnalyticsResult<()> {
        let envelope = Self::envelope(dsn, event)?;
        self.transport
            .post_text(
                dsn.envelope_url(),
                ENVELOPE_CONTENT_TYPE,
                envelope,
                &[("x-sentry-auth", auth.to_string())],
            )
            .await?;
        Ok(())
    }

    /// Serialize one event into the newline-delimited envelope format.
    pub fn envelope(dsn: &SentryDsn, event: &Event) -> AnalyticsResult<String> {
        let body = serde_json::to_string(&Self::to_sentry_event(event))?;
        let header = json!({
            "event_id": event.id.simple().to_string(),
            "dsn": dsn.raw,
            "sent_at": chrono::Utc::now().to_rfc3339(),
        });
        let item_header = json!({ "type": "event", "length": body.len() });
        Ok(format!("{header}\n{item_header}\n{body}\n"))
    }
}

#[async_trait]
impl AnalyticsAdapter for SentryAdaptor {
    fn kind(&self) -> BackendKind {
        BackendKind::Sentry
    }

    async fn init(&self) -> AnalyticsResult<()> {
        let dsn = SentryDsn::parse(&self.dsn_source)?;
        info!(project_id = %dsn.project_id, "Sentry adaptor ready");
        *self.dsn.write() = Some(dsn);
        Ok(())
    }

    async fn send_events(&self, events: &[Event]) -> AnalyticsResult<()> {
        let Some(dsn) = self.dsn.read().clone() else {
            return Err(AnalyticsError::adapter(BackendKind::Sentry, "not initialized"));
        };
        let auth = dsn.auth_header();

        let mut sent = 0usize;
        for (position, event) in events.iter().enumerate() {
            if event.name != "error" {
                continue;
            }
            if let Err(e) = self.post_envelope(&dsn, &auth, event).await {
                // Ignored kinds count as accepted wherever they sit in the batch.
                let accepted = events
                    .iter()
                    .enumerate()
                    .filter(|(i, other)| *i < position || other.name != "error")
                    .map(|(_, other)| other.id)
                    .collect();
                return Err(AnalyticsError::partial(accepted, e));
            }
            sent += 1;
        }
        if sent > 0 {
            debug!(count = sent, "Sentry envelopes sent");
        }
        Ok(())
    }
}
