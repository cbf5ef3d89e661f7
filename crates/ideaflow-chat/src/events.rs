//! Chat event types

use ideaflow_ai::SearchBundle;
use serde::{Deserialize, Serialize};

/// Events emitted while a chat exchange runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// An exchange started; `message_id` is the assistant placeholder
    ExchangeStart {
        session_id: String,
        message_id: String,
    },

    /// Lookup results arrived ahead of the reply
    SearchResults {
        session_id: String,
        bundle: SearchBundle,
    },

    /// The reply grew; `content` is the full text so far
    ReplyUpdate {
        session_id: String,
        message_id: String,
        content: String,
    },

    /// The reply was finalized
    ReplyEnd {
        session_id: String,
        message_id: String,
        content: String,
        /// Recovery stage name when the text came from the reasoning channel
        recovered_by: Option<String>,
    },

    /// The exchange failed; `message` replaced the placeholder content
    Error {
        session_id: String,
        message_id: String,
        message: String,
    },
}

impl ChatEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::ReplyEnd { .. } | ChatEvent::Error { .. })
    }
}
