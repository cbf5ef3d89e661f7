//! Zhipu GLM chat completions and web search

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;

use super::{ChatBackend, SearchBackend};
use crate::error::{Error, Result};
use crate::models::GLM_BASE_URL;
use crate::search::{SearchRequest, SearchResponse};
use crate::stream::ChunkStream;
use crate::types::{ChatMessage, ChatRequest, GenerationParams, Model};

/// Environment variable holding the API key
pub const API_KEY_ENV: &str = "GLM_API_KEY";

/// GLM API client
#[derive(Clone)]
pub struct GlmProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlmProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GlmProvider {
    /// Create a provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: GLM_BASE_URL.to_string(),
        }
    }

    /// Point lookups and key validation at a different base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.post(url).bearer_auth(&self.api_key)
    }

    /// Check whether the key is accepted with a tiny non-streaming completion.
    ///
    /// Returns `Ok(false)` when the key is rejected and an error for any other
    /// failure.
    pub async fn validate_api_key(&self, model: &Model) -> Result<bool> {
        let mut request = ChatRequest::streaming(
            model,
            vec![ChatMessage::user("hi")],
            GenerationParams {
                temperature: 0.1,
                max_tokens: 1,
            },
        );
        request.stream = false;

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("Validating API key against {}", url);
        let response = self.post(&url).json(&request).send().await?;

        match check_status(response).await {
            Ok(_) => Ok(true),
            Err(Error::Auth { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Map a non-success response to an error, consuming its body.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);

    tracing::warn!("Upstream returned {}: {}", status.as_u16(), message);
    Err(Error::from_status(status.as_u16(), message, retry_after))
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// Prefer the `error.message` field of a JSON error body over the raw text.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => parsed.error.message,
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl ChatBackend for GlmProvider {
    async fn open_stream(&self, model: &Model, request: &ChatRequest) -> Result<ChunkStream> {
        let url = format!("{}/chat/completions", model.base_url.trim_end_matches('/'));

        let builder = self.post(&url).json(request);

        tracing::debug!(
            "Opening chat stream: model={} messages={}",
            request.model,
            request.messages.len()
        );
        let response = check_status(builder.send().await?).await?;

        let chunks = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| Error::Transport(e.to_string()))
        });
        Ok(Box::pin(chunks))
    }
}

#[async_trait]
impl SearchBackend for GlmProvider {
    async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let url = format!("{}/web_search", self.base_url);
        tracing::debug!("Web search: {}", request.search_query);

        let response = check_status(self.post(&url).json(request).send().await?).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}
