//! Error types for the Capital.com integration.

use thiserror::Error;

/// Errors that can occur when talking to Capital.com.
#[derive(Debug, Error)]
pub enum CapitalError {
    /// Session creation or token refresh failed.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// API request returned a non-success status.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error body from the API.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimit {
        /// Seconds to wait before retry.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// The platform rejected a deal during confirmation.
    #[error("deal {reference} rejected with status {status}")]
    DealRejected {
        /// Deal reference of the rejected intent.
        reference: String,
        /// Terminal status reported by the confirms endpoint.
        status: String,
    },

    /// Confirmation polling budget exhausted without a terminal status.
    #[error("deal confirmation timed out: {reference}")]
    ConfirmTimeout {
        /// Deal reference still pending.
        reference: String,
    },

    /// A response was missing a field the protocol requires.
    #[error("missing field in response: {0}")]
    MissingField(&'static str),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CapitalError {
    /// Creates an API error from a status code and body.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// True when the iteration should simply be skipped and retried on the
    /// next cadence (timeouts, connection drops, 5xx, rate limits).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimit { .. } => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CapitalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CapitalError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for Capital.com operations.
pub type Result<T> = std::result::Result<T, CapitalError>;
