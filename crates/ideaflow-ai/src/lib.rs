//! ideaflow-ai: streaming LLM client for the ideaflow chat assistant
//!
//! This crate turns a chunked chat-completions response into answer text. It
//! reassembles server-sent events, separates the answer channel from the
//! reasoning channel, recovers a short reply from reasoning-only responses, and
//! performs the optional web search lookup that grounds a reply.

pub mod error;
pub mod models;
pub mod providers;
pub mod recovery;
pub mod search;
pub mod sse;
pub mod stream;
pub mod types;
pub mod utils;

pub use error::{Error, ErrorCategory, Result};
pub use providers::{ChatBackend, GlmProvider, SearchBackend};
pub use recovery::{ReasoningRecovery, Recovered, RecoveryConfig};
pub use search::{
    KeywordTrigger, SearchBundle, SearchMode, SearchOptions, SearchRequest, SearchResponse,
    SearchResult, SearchTrigger,
};
pub use stream::{
    AccumulatedReply, ChunkStream, FinalReply, ReplySource, StreamEvent, StreamEventStream,
};
pub use types::*;
