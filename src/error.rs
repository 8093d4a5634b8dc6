//! Error types for Snapgram
//!
//! Gateway and configuration failures are represented by `AppError`.
//! The query layer shares results between concurrent readers, so it wraps
//! gateway failures in the cloneable `QueryError`.

use std::sync::Arc;

use thiserror::Error;

use crate::query::QueryKey;

/// Application-wide error type
///
/// Every gateway call resolves to `Result<T, AppError>`. The cache layer
/// never retries or swallows these; they surface as query/mutation state.
#[derive(Debug, Error)]
pub enum AppError {
    /// Document or account not found (404)
    #[error("Resource not found")]
    NotFound,

    /// No active session, or the session was rejected (401)
    #[error("Authentication required")]
    Unauthorized,

    /// Input rejected before reaching the backend
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend answered with a non-success status
    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// Transport failure
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
            AppError::Validation(_) => "validation",
            AppError::Backend { .. } => "backend",
            AppError::HttpClient(_) => "http_client",
            AppError::Serialization(_) => "serialization",
            AppError::Config(_) => "config",
            AppError::Internal(_) => "internal",
        }
    }

    /// Map a backend status code and message to an error
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 => AppError::Unauthorized,
            404 => AppError::NotFound,
            _ => AppError::Backend {
                status,
                message: message.into(),
            },
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

/// Error carried by query and mutation state
///
/// Cloneable so one failed fetch can be handed to every reader that was
/// waiting on it.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The gateway call failed
    #[error(transparent)]
    Gateway(Arc<AppError>),

    /// Cached data under this key has a different type than requested
    #[error("cached data for {0} has an unexpected type")]
    TypeMismatch(QueryKey),
}

impl QueryError {
    /// The underlying gateway error, if any
    pub fn gateway(&self) -> Option<&AppError> {
        match self {
            QueryError::Gateway(error) => Some(error),
            QueryError::TypeMismatch(_) => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self.gateway(), Some(AppError::Unauthorized))
    }
}

impl From<AppError> for QueryError {
    fn from(err: AppError) -> Self {
        record_error(&err);
        QueryError::Gateway(Arc::new(err))
    }
}

fn record_error(err: &AppError) {
    use crate::metrics::ERRORS_TOTAL;
    ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_variants() {
        assert!(matches!(AppError::from_status(401, "x"), AppError::Unauthorized));
        assert!(matches!(AppError::from_status(404, "x"), AppError::NotFound));
        assert!(matches!(
            AppError::from_status(500, "boom"),
            AppError::Backend { status: 500, message } if message == "boom"
        ));
    }

    #[test]
    fn query_error_exposes_gateway_error() {
        let error = QueryError::from(AppError::Unauthorized);
        assert!(error.is_unauthorized());

        let cloned = error.clone();
        assert_eq!(cloned.to_string(), "Authentication required");
    }
}
