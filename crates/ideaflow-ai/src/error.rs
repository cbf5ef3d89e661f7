//! Error types for ideaflow-ai

use thiserror::Error;

/// Result type alias using ideaflow-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the upstream model or lookup service
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API returned a non-success response
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Rate limit exceeded
    #[error("Rate limited (429): retry after {retry_after:?} seconds")]
    RateLimited { retry_after: Option<u64> },

    /// Authentication or authorization failed
    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// The chunked transport failed mid-stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected response format
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Coarse classification used to pick a user-facing message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Credentials were rejected (401/403)
    Auth,
    /// Upstream asked us to slow down (429)
    RateLimit,
    /// Connection-level failure
    Network,
    /// The caller abandoned the exchange
    Cancelled,
    /// Anything else
    Other,
}

impl Error {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status into an error.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<u64>) -> Self {
        let message = body.into();
        match status {
            401 | 403 => Self::Auth { status, message },
            429 => Self::RateLimited { retry_after },
            _ => Self::Api { status, message },
        }
    }

    /// Check if opening a request may be retried after this error.
    ///
    /// Auth and rate-limit failures are never retried so the caller can show
    /// a specific message for them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => !e.is_status() && !e.is_decode(),
            Error::Transport(_) => true,
            Error::Api { status, message } => {
                *status >= 500 || message.to_lowercase().contains("overloaded")
            }
            _ => false,
        }
    }

    /// Classify this error for user-facing reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Auth { .. } | Error::InvalidApiKey => ErrorCategory::Auth,
            Error::RateLimited { .. } => ErrorCategory::RateLimit,
            Error::Api { status: 401 | 403, .. } => ErrorCategory::Auth,
            Error::Api { status: 429, .. } => ErrorCategory::RateLimit,
            Error::Http(_) | Error::Transport(_) => ErrorCategory::Network,
            _ => ErrorCategory::Other,
        }
    }

    /// Short human-readable text to show in place of a failed reply
    pub fn user_message(&self) -> String {
        match self.category() {
            ErrorCategory::Auth => "Invalid API key, please check your credentials.".to_string(),
            ErrorCategory::RateLimit => "Too many requests, please try again later.".to_string(),
            ErrorCategory::Network => {
                "Network error, please check your connection and retry.".to_string()
            }
            ErrorCategory::Cancelled => "Request cancelled.".to_string(),
            ErrorCategory::Other => format!("Error: {}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_auth() {
        let e = Error::from_status(401, "invalid key", None);
        assert!(matches!(e, Error::Auth { status: 401, .. }));
        assert_eq!(e.category(), ErrorCategory::Auth);

        let e = Error::from_status(403, "forbidden", None);
        assert_eq!(e.category(), ErrorCategory::Auth);
    }

    #[test]
    fn test_from_status_rate_limit() {
        let e = Error::from_status(429, "slow down", Some(3));
        assert!(matches!(e, Error::RateLimited { retry_after: Some(3) }));
        assert_eq!(e.category(), ErrorCategory::RateLimit);
    }

    #[test]
    fn test_from_status_other() {
        let e = Error::from_status(500, "boom", None);
        assert!(matches!(e, Error::Api { status: 500, .. }));
        assert_eq!(e.category(), ErrorCategory::Other);
    }

    #[test]
    fn test_category_on_raw_api_status() {
        assert_eq!(Error::api(401, "x").category(), ErrorCategory::Auth);
        assert_eq!(Error::api(429, "x").category(), ErrorCategory::RateLimit);
        assert_eq!(Error::api(400, "x").category(), ErrorCategory::Other);
    }

    #[test]
    fn test_transport_is_network() {
        let e = Error::Transport("connection reset".into());
        assert_eq!(e.category(), ErrorCategory::Network);
        assert!(e.is_retryable());
    }

    #[test]
    fn test_retryable_server_errors() {
        assert!(Error::api(502, "bad gateway").is_retryable());
        assert!(Error::api(400, "the engine is overloaded").is_retryable());
        assert!(!Error::api(400, "bad request").is_retryable());
    }

    #[test]
    fn test_auth_and_rate_limit_not_retryable() {
        assert!(!Error::from_status(401, "no", None).is_retryable());
        assert!(!Error::RateLimited { retry_after: None }.is_retryable());
        assert!(!Error::InvalidApiKey.is_retryable());
    }

    #[test]
    fn test_user_messages_are_distinct() {
        let auth = Error::from_status(401, "", None).user_message();
        let rate = Error::from_status(429, "", None).user_message();
        let net = Error::Transport("eof".into()).user_message();
        assert!(auth.contains("API key"));
        assert!(rate.contains("try again later"));
        assert!(net.contains("Network"));
        assert_ne!(auth, rate);
    }

    #[test]
    fn test_user_message_other_includes_detail() {
        let msg = Error::UnexpectedResponse("empty body".into()).user_message();
        assert!(msg.starts_with("Error: "));
        assert!(msg.contains("empty body"));
    }
}
