pub mod adapter;
pub mod config;
pub mod error;
pub mod types;

pub use adapter::{AdapterContext, AdapterFactory, AnalyticsAdapter};
pub use config::{AnalyticsConfig, BackendCredentials, ConfigSummary};
pub use error::{AnalyticsError, AnalyticsResult};
pub use types::{BackendKind, Event, EventOptions, Priority, Properties, Session};
