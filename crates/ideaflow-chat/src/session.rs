//! Chat session state

use chrono::{DateTime, Utc};
use ideaflow_ai::{ChatMessage, Role, SearchBundle, SearchResult, utils::ellipsize};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of most recent messages sent upstream with each exchange
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Title of a session before its first user message
pub const UNTITLED: &str = "New chat";

const TITLE_CHARS: usize = 30;

/// What a session message represents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    /// Ordinary user or assistant turn
    Chat,
    /// Raw lookup results shown ahead of the reply
    SearchResults {
        results: Vec<SearchResult>,
        query: String,
        timestamp: String,
    },
    /// Compact summary of the lookup results
    SearchSummary { query: String, timestamp: String },
}

/// A message stored in a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub kind: MessageKind,
    /// Set while the reply is still streaming into this message
    #[serde(default)]
    pub is_streaming: bool,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    fn new(role: Role, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            kind,
            is_streaming: false,
            timestamp: Utc::now(),
        }
    }

    /// A user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageKind::Chat)
    }

    /// An assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, MessageKind::Chat)
    }

    /// An empty assistant message that the reply streams into
    pub fn placeholder() -> Self {
        Self {
            is_streaming: true,
            ..Self::assistant("")
        }
    }

    /// The raw lookup results message
    pub fn search_results(bundle: &SearchBundle, timestamp: &str) -> Self {
        Self::new(
            Role::Assistant,
            bundle.formatted_text.clone(),
            MessageKind::SearchResults {
                results: bundle.structured_results.clone(),
                query: bundle.query.clone(),
                timestamp: timestamp.to_string(),
            },
        )
    }

    /// The compact lookup summary message
    pub fn search_summary(bundle: &SearchBundle, timestamp: &str) -> Self {
        Self::new(
            Role::Assistant,
            bundle.summary(Some(timestamp)),
            MessageKind::SearchSummary {
                query: bundle.query.clone(),
                timestamp: timestamp.to_string(),
            },
        )
    }

    /// Convert to the upstream message shape
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// One conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<SessionMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    /// Create an empty session
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: UNTITLED.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append a message and return its id. The first user message names the
    /// session.
    pub fn push(&mut self, message: SessionMessage) -> String {
        if message.role == Role::User && self.title == UNTITLED && !self.has_user_message() {
            self.title = session_title(&message.content);
        }
        let id = message.id.clone();
        self.messages.push(message);
        self.touch();
        id
    }

    /// Insert `message` right before the message with id `before`, or append
    /// when `before` is unknown.
    pub fn insert_before(&mut self, before: &str, message: SessionMessage) -> String {
        let id = message.id.clone();
        match self.messages.iter().position(|m| m.id == before) {
            Some(idx) => self.messages.insert(idx, message),
            None => self.messages.push(message),
        }
        self.touch();
        id
    }

    /// Replace a message's content. Returns `false` if the id is unknown.
    pub fn update_message(&mut self, id: &str, content: &str) -> bool {
        match self.message_mut(id) {
            Some(message) => {
                message.content.clear();
                message.content.push_str(content);
                self.touch();
                true
            }
            None => false,
        }
    }

    /// Clear the streaming flag of a message
    pub fn finish_streaming(&mut self, id: &str) {
        if let Some(message) = self.message_mut(id) {
            message.is_streaming = false;
            self.touch();
        }
    }

    pub fn message(&self, id: &str) -> Option<&SessionMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    fn message_mut(&mut self, id: &str) -> Option<&mut SessionMessage> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    fn has_user_message(&self) -> bool {
        self.messages.iter().any(|m| m.role == Role::User)
    }

    /// The last `limit` messages in upstream shape, skipping any still
    /// streaming and any without content.
    pub fn history(&self, limit: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..]
            .iter()
            .filter(|m| !m.is_streaming && !m.content.trim().is_empty())
            .map(SessionMessage::to_chat_message)
            .collect()
    }
}

/// Session title derived from the first user message
pub fn session_title(first_message: &str) -> String {
    let line = first_message.trim().lines().next().unwrap_or_default();
    match ellipsize(line.trim(), TITLE_CHARS, "...") {
        title if title.is_empty() => UNTITLED.to_string(),
        title => title,
    }
}
