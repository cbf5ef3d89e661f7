//! ideaflow-chat: chat exchange runtime
//!
//! This crate runs one chat exchange at a time per session: an optional web
//! search lookup, the streamed reply with incremental updates, reasoning
//! recovery when the answer channel stays empty, and cancellation.

pub mod chat;
pub mod error;
pub mod events;
pub mod exchange;
pub mod handle;
pub mod session;

pub use chat::{Chat, ChatConfig};
pub use error::{Error, Result};
pub use events::ChatEvent;
pub use exchange::{ChatEngine, ExchangeConfig, ExchangeOutcome, ExchangeSink, RetryConfig};
pub use handle::ExchangeHandle;
pub use session::{ChatSession, MessageKind, SessionMessage};
