//! Adaptors translating tracked events into each backend's wire format.
//!
//! Every adaptor implements [`pulse_core::AnalyticsAdapter`] and owns the
//! payload mapping for its platform (GA4 Measurement Protocol, Metrica hits,
//! Sentry envelopes, AppMetrica CSV imports, and so on).

pub mod appmetrica;
pub mod ga;
pub mod hotjar;
pub mod internal;
pub mod openreplay;
pub mod sentry;
pub mod yandex;

use pulse_core::Event;
use url::Url;

/// Device bucket from the `deviceInfo` snapshot stamped on every event.
pub(crate) fn device_category(event: &Event) -> &'static str {
    let flag = |key: &str| {
        event
            .prop("deviceInfo")
            .and_then(|d| d.get(key))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    };
    if flag("isMobile") {
        "mobile"
    } else if flag("isTablet") {
        "tablet"
    } else {
        "desktop"
    }
}

/// `scheme://host[:port]` of an absolute URL.
pub(crate) fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let origin = parsed.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::Duration;

    use pulse_core::{Event, EventOptions, Properties};
    use serde_json::{json, Value};

    use crate::transport::HttpTransport;

    pub fn transport() -> HttpTransport {
        HttpTransport::new(Duration::from_secs(5)).unwrap()
    }

    /// An event enriched the way the orchestrator enriches it.
    pub fn event(name: &str, props: Value) -> Event {
        let mut properties = match props {
            Value::Object(map) => map,
            _ => Properties::new(),
        };
        properties.insert("sessionId".into(), json!("session-1"));
        properties.insert("timestamp".into(), json!(1_700_000_000_000i64));
        properties.insert("url".into(), json!("https://example.com/pricing"));
        properties.insert("userAgent".into(), json!({"full": "Mozilla/5.0"}));
        properties.insert(
            "deviceInfo".into(),
            json!({"isMobile": false, "isTablet": false, "isDesktop": true}),
        );
        Event::new(name, properties, EventOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_origin_of() {
        assert_eq!(
            origin_of("https://example.com:8443/a/b?c=d").as_deref(),
            Some("https://example.com:8443")
        );
        assert_eq!(origin_of("not a url"), None);
    }

    #[test]
    fn test_device_category() {
        let mut e = test_support::event("x", json!({}));
        assert_eq!(device_category(&e), "desktop");
        e.properties
            .insert("deviceInfo".into(), json!({"isMobile": true}));
        assert_eq!(device_category(&e), "mobile");
    }
}
