//! Service registry: builds and initializes one adapter per configured backend.

use std::sync::Arc;

use parking_lot::RwLock;
use pulse_core::{
    AdapterContext, AdapterFactory, AnalyticsAdapter, AnalyticsConfig, AnalyticsError,
    AnalyticsResult, BackendKind, Session,
};
use tracing::{error, info};

/// A backend that was configured but could not be brought up.
#[derive(Debug)]
pub struct RegistrationFailure {
    pub backend: BackendKind,
    pub error: AnalyticsError,
}

impl RegistrationFailure {
    /// Error type reported for this failure.
    pub fn error_type(&self) -> String {
        format!("service_registration_failed_{}", self.backend)
    }
}

/// Registered adapters, in registration order. Swapped in once at init.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<Arc<Vec<Arc<dyn AnalyticsAdapter>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct and initialize every enabled backend, in fixed order.
    ///
    /// A backend that fails to build or initialize is logged and left out;
    /// the failures are returned for the caller to report. Never fails as a whole.
    pub async fn register_services(
        &self,
        config: &AnalyticsConfig,
        session: &Session,
        factory: &dyn AdapterFactory,
    ) -> Vec<RegistrationFailure> {
        let ctx = AdapterContext { config, session };
        let mut registered: Vec<Arc<dyn AnalyticsAdapter>> = Vec::new();
        let mut failures = Vec::new();

        for kind in config.backends.enabled_backends() {
            match Self::bring_up(factory, kind, ctx).await {
                Ok(adapter) => {
                    info!(backend = %kind, "analytics service registered");
                    registered.push(adapter);
                }
                Err(e) => {
                    error!(backend = %kind, error = %e, "failed to register analytics service");
                    failures.push(RegistrationFailure {
                        backend: kind,
                        error: e,
                    });
                }
            }
        }

        *self.services.write() = Arc::new(registered);
        failures
    }

    async fn bring_up(
        factory: &dyn AdapterFactory,
        kind: BackendKind,
        ctx: AdapterContext<'_>,
    ) -> AnalyticsResult<Arc<dyn AnalyticsAdapter>> {
        let adapter = factory.create(kind, ctx)?;
        adapter.init().await?;
        Ok(adapter)
    }

    /// Cheap snapshot of the registered adapters, safe to hold across awaits.
    pub fn services(&self) -> Arc<Vec<Arc<dyn AnalyticsAdapter>>> {
        Arc::clone(&self.services.read())
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        self.services.read().iter().map(|s| s.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}
