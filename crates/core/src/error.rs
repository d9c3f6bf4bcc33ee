use thiserror::Error;
use uuid::Uuid;

use crate::types::BackendKind;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid credentials for {backend}: {message}")]
    InvalidCredentials {
        backend: BackendKind,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Rate limited, retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("{backend} adapter error: {message}")]
    Adapter {
        backend: BackendKind,
        message: String,
    },

    #[error("Session storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),

    /// A multi-request send failed part way; `accepted` already reached the backend.
    #[error("{} events accepted before failure: {source}", .accepted.len())]
    PartialDelivery {
        accepted: Vec<Uuid>,
        source: Box<AnalyticsError>,
    },
}

impl AnalyticsError {
    /// Whether a delivery that failed with this error may succeed if retried.
    /// Adapter-level failures without a status are treated as transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            AnalyticsError::RequestFailed(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status()
                        .map(|s| retryable_status(s.as_u16()))
                        .unwrap_or(true)
            }
            AnalyticsError::ServerError { status, .. } => retryable_status(*status),
            AnalyticsError::PartialDelivery { source, .. } => source.is_retryable(),
            AnalyticsError::RateLimited { .. } => true,
            AnalyticsError::Adapter { .. } => true,
            AnalyticsError::Io(_) => true,
            AnalyticsError::Config(_)
            | AnalyticsError::InvalidCredentials { .. }
            | AnalyticsError::Storage(_)
            | AnalyticsError::Serialization(_)
            | AnalyticsError::Internal(_) => false,
        }
    }

    /// Wrap `error` with the events that were accepted before it. An empty
    /// `accepted` list returns `error` unchanged.
    pub fn partial(accepted: Vec<Uuid>, error: AnalyticsError) -> Self {
        if accepted.is_empty() {
            return error;
        }
        AnalyticsError::PartialDelivery {
            accepted,
            source: Box::new(error),
        }
    }

    /// Events the backend accepted despite this error.
    pub fn accepted(&self) -> &[Uuid] {
        match self {
            AnalyticsError::PartialDelivery { accepted, .. } => accepted,
            _ => &[],
        }
    }

    pub fn adapter(backend: BackendKind, message: impl Into<String>) -> Self {
        AnalyticsError::Adapter {
            backend,
            message: message.into(),
        }
    }
}

fn retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}
