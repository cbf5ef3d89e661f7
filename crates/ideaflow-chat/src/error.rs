//! Error types for ideaflow-chat

use ideaflow_ai::{AccumulatedReply, ErrorCategory};
use thiserror::Error;

/// Result type alias using ideaflow-chat Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a chat exchange
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the AI layer before any part of the reply was read
    #[error(transparent)]
    Ai(#[from] ideaflow_ai::Error),

    /// The stream failed after it was opened. Whatever was accumulated up to
    /// the failure is kept in `partial`.
    #[error("Stream failed: {source}")]
    Stream {
        source: ideaflow_ai::Error,
        partial: Box<AccumulatedReply>,
    },

    /// The caller cancelled the exchange
    #[error("Exchange cancelled")]
    Cancelled { partial: Box<AccumulatedReply> },

    /// A generic chat error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Text accumulated before the exchange ended, if any was read
    pub fn partial(&self) -> Option<&AccumulatedReply> {
        match self {
            Error::Stream { partial, .. } | Error::Cancelled { partial } => Some(partial),
            _ => None,
        }
    }

    /// Classify this error for user-facing reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Ai(e) | Error::Stream { source: e, .. } => e.category(),
            Error::Cancelled { .. } => ErrorCategory::Cancelled,
            Error::Other(_) => ErrorCategory::Other,
        }
    }

    /// Short human-readable text to show in place of a failed reply
    pub fn user_message(&self) -> String {
        match self {
            Error::Ai(e) | Error::Stream { source: e, .. } => e.user_message(),
            Error::Cancelled { .. } => "Request cancelled.".to_string(),
            Error::Other(msg) => format!("Error: {}", msg),
        }
    }
}
