//! Upstream backends

pub mod glm;

use async_trait::async_trait;

use crate::search::{SearchRequest, SearchResponse};
use crate::stream::ChunkStream;
use crate::{ChatRequest, Error, Model, Result};

pub use glm::GlmProvider;

/// A backend that opens a streaming chat completion
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Open the stream and return its raw byte chunks.
    ///
    /// Non-success statuses are reported here, before any chunk is read.
    async fn open_stream(&self, model: &Model, request: &ChatRequest) -> Result<ChunkStream>;
}

/// A backend that performs web-search lookups
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
}

/// Get an API key from the provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(Error::InvalidApiKey)
}
