//! Backend adaptors for the analytics orchestrator: server-side forwarding
//! of tracked events to Google Analytics 4, Yandex Metrica, Sentry,
//! AppMetrica, OpenReplay, Hotjar and the internal analytics API.
//!
//! # Modules
//!
//! - [`adaptors`]: One adaptor per backend, each owning its payload mapping
//! - [`factory`]: Static mapping from backend kind to adaptor
//! - [`transport`]: Shared HTTP client and response classification

pub mod adaptors;
pub mod factory;
pub mod transport;

pub use adaptors::ga::GaAdaptor;
pub use adaptors::internal::InternalAdaptor;
pub use factory::StaticAdapterFactory;
pub use transport::HttpTransport;
