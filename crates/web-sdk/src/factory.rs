//! Static backend registry: maps each [`BackendKind`] to its concrete adaptor.

use std::sync::Arc;

use pulse_core::{
    AdapterContext, AdapterFactory, AnalyticsAdapter, AnalyticsError, AnalyticsResult, BackendKind,
};

use crate::adaptors::appmetrica::{AppMetricaAdaptor, AppMetricaConfig};
use crate::adaptors::ga::{GaAdaptor, GaConfig};
use crate::adaptors::hotjar::HotjarAdaptor;
use crate::adaptors::internal::{InternalAdaptor, InternalContext};
use crate::adaptors::openreplay::OpenReplayAdaptor;
use crate::adaptors::sentry::SentryAdaptor;
use crate::adaptors::yandex::{YandexConfig, YandexMetricaAdaptor};
use crate::transport::HttpTransport;

/// Builds the HTTP-backed adaptor for every backend kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticAdapterFactory;

impl AdapterFactory for StaticAdapterFactory {
    fn create(
        &self,
        kind: BackendKind,
        ctx: AdapterContext<'_>,
    ) -> AnalyticsResult<Arc<dyn AnalyticsAdapter>> {
        let creds = &ctx.config.backends;
        let credential = || {
            creds
                .gate(kind)
                .map(str::to_string)
                .ok_or_else(|| AnalyticsError::InvalidCredentials {
                    backend: kind,
                    message: "credential not configured".into(),
                })
        };
        let transport = HttpTransport::new(ctx.config.request_timeout())?;

        let adapter: Arc<dyn AnalyticsAdapter> = match kind {
            BackendKind::GoogleAnalytics => Arc::new(GaAdaptor::new(
                GaConfig {
                    measurement_id: credential()?,
                    api_secret: creds.ga_api_secret.clone().unwrap_or_default(),
                    endpoint: creds.ga_endpoint.clone(),
                    debug_mode: ctx.config.debug,
                },
                transport,
            )),
            BackendKind::YandexMetrica => Arc::new(YandexMetricaAdaptor::new(
                YandexConfig {
                    counter_id: credential()?,
                    measurement_secret: creds.yandex_measurement_secret.clone(),
                    endpoint: creds.yandex_endpoint.clone(),
                },
                transport,
            )),
            BackendKind::Sentry => Arc::new(SentryAdaptor::new(credential()?, transport)),
            BackendKind::AppMetrica => Arc::new(AppMetricaAdaptor::new(
                AppMetricaConfig {
                    post_api_key: credential()?,
                    application_id: creds.appmetrica_app_id.clone(),
                    endpoint: creds.appmetrica_endpoint.clone(),
                },
                transport,
            )),
            BackendKind::OpenReplay => Arc::new(OpenReplayAdaptor::new(
                credential()?,
                creds.openreplay_endpoint.clone(),
                transport,
            )),
            BackendKind::Hotjar => Arc::new(HotjarAdaptor::new(
                credential()?,
                creds.hotjar_endpoint.clone(),
                transport,
            )),
            BackendKind::Internal => Arc::new(InternalAdaptor::new(
                creds.internal_endpoint.clone(),
                InternalContext::from_session(ctx.session, creds.build_id.as_deref()),
                transport,
            )),
        };
        Ok(adapter)
    }
}
