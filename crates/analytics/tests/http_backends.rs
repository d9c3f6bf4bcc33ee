//! Orchestrator wired to the real HTTP adaptors, against a mock server.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pulse_analytics::{FileSessionStore, Orchestrator, SessionStore, StaticEnvironment};
    use pulse_core::{AnalyticsConfig, BackendKind, EventOptions, Properties};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, storage: &std::path::Path) -> AnalyticsConfig {
        let mut config = AnalyticsConfig {
            storage_dir: storage.to_path_buf(),
            ..Default::default()
        };
        config.backends.internal_endpoint = server.uri();
        config.backends.ga_id = Some("G-TEST123".into());
        config.backends.ga_api_secret = Some("secret".into());
        config.backends.ga_endpoint = server.uri();
        config
    }

    #[tokio::test]
    async fn test_events_reach_every_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/analytics/health"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/analytics/events"))
            .and(body_partial_json(json!({"eventType": "signup"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/analytics/events"))
            .and(body_partial_json(json!({"eventType": "analytics_initialized"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mp/collect"))
            .and(query_param("measurement_id", "G-TEST123"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path());
        let store = FileSessionStore::new(config.session_path());
        let o = Orchestrator::builder(config)
            .environment(Arc::new(StaticEnvironment::desktop()))
            .session_store(Arc::new(store.clone()))
            .build();
        o.init().await;

        assert_eq!(
            o.session_metrics().services_active,
            vec![BackendKind::GoogleAnalytics, BackendKind::Internal]
        );
        assert_eq!(store.load().unwrap(), o.session());

        let mut props = Properties::new();
        props.insert("plan".into(), json!("pro"));
        o.track("signup", props, EventOptions::default());

        let report = o.flush(false).await;
        assert_eq!(report.drained, 2);
        assert_eq!(report.dispatched_to, 2);
        assert_eq!(report.delivered, 4);
        assert_eq!(o.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/analytics/events"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.backends.ga_id = None;
        let o = Orchestrator::builder(config)
            .environment(Arc::new(StaticEnvironment::desktop()))
            .build();
        o.init().await;

        let report = o.flush(false).await;
        assert_eq!(report.requeued, 1);
        let pending = o.pending_events();
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].is_targeted_at(BackendKind::Internal));
    }

    async fn posts_of(server: &MockServer, event_type: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == "/api/analytics/events")
            .filter_map(|r| serde_json::from_slice::<serde_json::Value>(&r.body).ok())
            .filter(|body| body["eventType"] == event_type)
            .count()
    }

    #[tokio::test]
    async fn test_sent_groups_are_not_resent_after_partial_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/analytics/events"))
            .and(body_partial_json(json!({"eventType": "checkout"})))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/analytics/events"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.backends.ga_id = None;
        let o = Orchestrator::builder(config)
            .environment(Arc::new(StaticEnvironment::desktop()))
            .build();
        o.init().await;

        o.track("signup", Properties::new(), EventOptions::default());
        o.track("checkout", Properties::new(), EventOptions::default());
        let first = o.flush(false).await;
        assert_eq!(first.requeued, 1);
        assert_eq!(o.pending_events()[0].name, "checkout");

        let second = o.flush(false).await;
        assert_eq!(second.requeued, 0);
        assert_eq!(o.queue_len(), 0);
        assert_eq!(posts_of(&server, "signup").await, 1);
        assert_eq!(posts_of(&server, "checkout").await, 2);
    }

    #[tokio::test]
    async fn test_clear_data_reaches_backends_and_storage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/analytics/clear-data"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&server, dir.path());
        config.backends.ga_id = None;
        let store = FileSessionStore::new(config.session_path());
        let o = Orchestrator::builder(config)
            .environment(Arc::new(StaticEnvironment::desktop()))
            .session_store(Arc::new(store.clone()))
            .build();
        o.init().await;
        assert!(store.load().unwrap().is_some());

        o.clear_data().await;
        assert!(store.load().unwrap().is_none());
        assert_eq!(o.queue_len(), 0);
    }
}
