//! End-to-end delivery behavior of the orchestrator against recording adapters.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use pulse_analytics::{MemorySessionStore, Orchestrator, StaticEnvironment};
    use pulse_core::adapter::{FailureMode, RecordingAdapter};
    use pulse_core::{
        AdapterContext, AdapterFactory, AnalyticsAdapter, AnalyticsConfig, AnalyticsError,
        AnalyticsResult, BackendKind, EventOptions, Priority, Properties,
    };
    use serde_json::json;

    /// Hands out pre-built recording adapters; kinds without one fail to build.
    struct ScriptedFactory {
        adapters: HashMap<BackendKind, Arc<RecordingAdapter>>,
    }

    impl ScriptedFactory {
        fn new(adapters: Vec<Arc<RecordingAdapter>>) -> Self {
            Self {
                adapters: adapters
                    .into_iter()
                    .map(|a| (a.kind(), a))
                    .collect(),
            }
        }
    }

    impl AdapterFactory for ScriptedFactory {
        fn create(
            &self,
            kind: BackendKind,
            _ctx: AdapterContext<'_>,
        ) -> AnalyticsResult<Arc<dyn AnalyticsAdapter>> {
            match self.adapters.get(&kind) {
                Some(adapter) => Ok(adapter.clone()),
                None => Err(AnalyticsError::Config(format!("no adapter for {kind}"))),
            }
        }
    }

    fn build(config: AnalyticsConfig, adapters: Vec<Arc<RecordingAdapter>>) -> Orchestrator {
        Orchestrator::builder(config)
            .environment(Arc::new(StaticEnvironment::desktop()))
            .session_store(Arc::new(MemorySessionStore::new()))
            .adapter_factory(Arc::new(ScriptedFactory::new(adapters)))
            .build()
    }

    fn internal(failure: FailureMode) -> Arc<RecordingAdapter> {
        Arc::new(RecordingAdapter::new(BackendKind::Internal).failing(failure))
    }

    fn track_numbered(o: &Orchestrator, n: usize) {
        let mut props = Properties::new();
        props.insert("n".into(), json!(n));
        o.track("step", props, EventOptions::default());
    }

    fn delivered_names(adapter: &RecordingAdapter) -> Vec<String> {
        adapter.delivered().into_iter().map(|e| e.name).collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn delivery_follows_track_order(count in 1usize..40, flush_every in 1usize..8) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let delivered: Vec<u64> = runtime.block_on(async {
                let adapter = internal(FailureMode::Never);
                let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
                o.init().await;
                o.flush(true).await;

                for n in 0..count {
                    track_numbered(&o, n);
                    if n % flush_every == 0 {
                        o.flush(false).await;
                    }
                }
                o.flush(false).await;
                adapter
                    .delivered()
                    .into_iter()
                    .filter(|e| e.name == "step")
                    .filter_map(|e| e.properties["n"].as_u64())
                    .collect()
            });
            let expected: Vec<u64> = (0..count as u64).collect();
            prop_assert_eq!(delivered, expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_after_max_retries() {
        let adapter = internal(FailureMode::Times(3));
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        track_numbered(&o, 1);

        let first = o.flush(false).await;
        assert_eq!(first.requeued, 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(o.queue_len(), 0);
        assert_eq!(adapter.send_calls(), 4);

        let steps: Vec<_> = adapter
            .delivered()
            .into_iter()
            .filter(|e| e.name == "step")
            .collect();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].attempts, 3);
        assert_eq!(o.counters().retried(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_backend_drops_after_budget() {
        let adapter = internal(FailureMode::Always);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        o.flush(true).await;
        let sends_before = adapter.send_calls();

        track_numbered(&o, 1);
        o.flush(false).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(o.queue_len(), 0);
        assert!(adapter.delivered().is_empty());
        assert_eq!(adapter.send_calls() - sends_before, 4);
        assert_eq!(o.session_metrics().events_dropped, 2);
    }

    #[tokio::test]
    async fn test_flush_on_empty_queue_is_noop() {
        let adapter = internal(FailureMode::Never);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        o.flush(false).await;
        let calls = adapter.send_calls();

        let report = o.flush(false).await;
        assert_eq!(report.drained, 0);
        assert_eq!(adapter.send_calls(), calls);
    }

    #[tokio::test]
    async fn test_forced_flush_abandons_failures() {
        let adapter = internal(FailureMode::Always);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        for n in 0..5 {
            track_numbered(&o, n);
        }

        let report = o.flush(true).await;
        assert_eq!(report.drained, 6);
        assert_eq!(report.requeued, 0);
        assert_eq!(o.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_allows_one_dispatch_per_window() {
        let adapter = internal(FailureMode::Never);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        track_numbered(&o, 1);

        let mut dispatched = 0;
        for _ in 0..10 {
            track_numbered(&o, 2);
            if o.throttled_flush().await.is_some() {
                dispatched += 1;
            }
        }
        assert_eq!(dispatched, 1);
        assert_eq!(adapter.send_calls(), 1);

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(o.throttled_flush().await.is_some());
    }

    #[tokio::test]
    async fn test_page_view_flushes_immediately() {
        let adapter = internal(FailureMode::Never);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        o.flush(true).await;

        o.track_page_view(Some("/pricing"), Properties::new());
        let queued = o.pending_events();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].name, "page_view");
        assert_eq!(queued[0].properties["page"], "/pricing");
        assert_eq!(queued[0].options.priority, Priority::High);
        assert!(queued[0].options.immediate);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(o.queue_len(), 0);
        assert!(delivered_names(&adapter).contains(&"page_view".to_string()));
    }

    #[tokio::test]
    async fn test_disabled_tracking_is_noop() {
        let config = AnalyticsConfig {
            enabled: false,
            debug: false,
            ..Default::default()
        };
        let o = build(config, vec![internal(FailureMode::Never)]);
        o.init().await;
        let before = o.queue_len();

        let a = o.track("x", Properties::new(), EventOptions::default());
        let b = o.track("x", Properties::new(), EventOptions::default());
        assert_ne!(a, b);
        assert_eq!(o.queue_len(), before);
        assert_eq!(o.counters().tracked(), 0);
    }

    #[tokio::test]
    async fn test_debug_mode_collects_while_disabled() {
        let config = AnalyticsConfig {
            enabled: false,
            debug: true,
            ..Default::default()
        };
        let o = build(config, vec![internal(FailureMode::Never)]);
        o.track("x", Properties::new(), EventOptions::default());
        assert_eq!(o.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_registry_isolates_failing_backend() {
        let mut config = AnalyticsConfig::default();
        config.backends.ga_id = Some("G-TEST".into());
        config.backends.sentry_dsn = Some("https://key@sentry.example/1".into());
        config.backends.hotjar_id = Some("12345".into());

        let internal = internal(FailureMode::Never);
        let o = build(
            config,
            vec![
                Arc::new(RecordingAdapter::new(BackendKind::GoogleAnalytics)),
                Arc::new(RecordingAdapter::new(BackendKind::Sentry)),
                Arc::new(RecordingAdapter::new(BackendKind::Hotjar).failing_init()),
                internal.clone(),
            ],
        );
        o.init().await;

        assert_eq!(o.stats().services_count, 3);
        assert_eq!(
            o.session_metrics().services_active,
            vec![
                BackendKind::GoogleAnalytics,
                BackendKind::Sentry,
                BackendKind::Internal
            ]
        );

        tokio::time::sleep(Duration::from_millis(10)).await;
        let errors: Vec<_> = internal
            .delivered()
            .into_iter()
            .filter(|e| e.name == "error")
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].properties["type"],
            "service_registration_failed_hotjar"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_check_flushes_full_queue() {
        let adapter = internal(FailureMode::Never);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        for n in 0..9 {
            track_numbered(&o, n);
        }

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(o.queue_len(), 0);
        assert_eq!(adapter.send_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_flushes_partial_queue() {
        let adapter = internal(FailureMode::Never);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        track_numbered(&o, 1);

        tokio::time::sleep(Duration::from_millis(4900)).await;
        assert_eq!(o.queue_len(), 2);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(o.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_and_stops_timers() {
        let adapter = internal(FailureMode::Never);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        track_numbered(&o, 1);

        let report = o.shutdown().await;
        assert_eq!(report.delivered, 2);

        track_numbered(&o, 2);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(o.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_unload_is_forced() {
        let adapter = internal(FailureMode::Always);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        track_numbered(&o, 1);

        let report = o.on_unload().await;
        assert_eq!(report.requeued, 0);
        assert_eq!(o.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_retry_skips_backend_that_accepted() {
        let mut config = AnalyticsConfig::default();
        config.backends.hotjar_id = Some("12345".into());
        let hotjar = Arc::new(
            RecordingAdapter::new(BackendKind::Hotjar).failing(FailureMode::Times(1)),
        );
        let internal = internal(FailureMode::Never);
        let o = build(config, vec![hotjar.clone(), internal.clone()]);
        o.init().await;

        o.flush(false).await;
        o.flush(false).await;
        assert_eq!(delivered_names(&internal), ["analytics_initialized"]);
        assert_eq!(delivered_names(&hotjar), ["analytics_initialized"]);
        assert_eq!(hotjar.delivered()[0].attempts, 1);
    }

    #[tokio::test]
    async fn test_low_priority_does_not_flush() {
        let adapter = internal(FailureMode::Never);
        let o = build(AnalyticsConfig::default(), vec![adapter.clone()]);
        o.init().await;
        o.flush(true).await;

        o.track(
            "background",
            Properties::new(),
            EventOptions::with_priority(Priority::Low),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(o.queue_len(), 1);
    }
}
