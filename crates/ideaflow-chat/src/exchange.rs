//! One chat exchange: optional lookup, stream, demultiplex, recover

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use ideaflow_ai::{
    AccumulatedReply, ChatBackend, ChatMessage, ChatRequest, ChunkStream, FinalReply,
    GenerationParams, KeywordTrigger, Model, ReasoningRecovery, ReplySource, Role, SearchBackend,
    SearchBundle, SearchMode, SearchOptions, SearchRequest, SearchTrigger, stream::decode_chunks,
};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Retry configuration for opening the chat stream
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Receives the caller-facing side of an exchange.
///
/// Neither method is called after the exchange is cancelled.
pub trait ExchangeSink: Send {
    /// The answer grew. `answer` is the full text so far, so render by replacing.
    fn on_update(&mut self, answer: &str);

    /// Lookup results, delivered at most once and before any `on_update`.
    fn on_search(&mut self, _bundle: &SearchBundle) {}
}

impl<F> ExchangeSink for F
where
    F: FnMut(&str) + Send,
{
    fn on_update(&mut self, answer: &str) {
        self(answer)
    }
}

/// Settings for every exchange run by a [`ChatEngine`]
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub model: Model,
    pub params: GenerationParams,
    pub search: SearchOptions,
    pub retry: RetryConfig,
}

impl ExchangeConfig {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            params: GenerationParams::default(),
            search: SearchOptions::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Result of a completed exchange
#[derive(Debug, Clone)]
pub struct ExchangeOutcome {
    /// Text to display and where it came from
    pub reply: FinalReply,
    /// Both buffers as they were when the stream ended
    pub accumulated: AccumulatedReply,
    /// Lookup results, if a lookup ran and returned anything
    pub search: Option<SearchBundle>,
}

/// Runs exchanges against a chat backend and an optional search backend.
///
/// Holds no per-exchange state, so one engine can drive any number of
/// concurrent exchanges.
pub struct ChatEngine {
    chat: Arc<dyn ChatBackend>,
    search: Option<Arc<dyn SearchBackend>>,
    trigger: Arc<dyn SearchTrigger>,
    recovery: ReasoningRecovery,
    config: ExchangeConfig,
}

impl ChatEngine {
    /// Create an engine without lookups
    pub fn new(chat: Arc<dyn ChatBackend>, config: ExchangeConfig) -> Self {
        Self {
            chat,
            search: None,
            trigger: Arc::new(KeywordTrigger::default()),
            recovery: ReasoningRecovery::default(),
            config,
        }
    }

    /// Enable lookups through `backend`
    pub fn with_search(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(backend);
        self
    }

    /// Replace the policy used by [`SearchMode::Auto`]
    pub fn with_trigger(mut self, trigger: Arc<dyn SearchTrigger>) -> Self {
        self.trigger = trigger;
        self
    }

    /// Replace the reasoning recovery pipeline
    pub fn with_recovery(mut self, recovery: ReasoningRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Change the model used by later exchanges
    pub fn set_model(&mut self, model: Model) {
        self.config.model = model;
    }

    /// Run one exchange over `messages`.
    ///
    /// The lookup, when triggered, completes before the stream is opened. On
    /// cancellation the stream is dropped and `sink` is not called again.
    pub async fn send(
        &self,
        messages: Vec<ChatMessage>,
        mode: SearchMode,
        sink: &mut dyn ExchangeSink,
        cancel: CancellationToken,
    ) -> Result<ExchangeOutcome> {
        if cancel.is_cancelled() {
            return Err(cancelled(AccumulatedReply::new()));
        }

        let mut messages = messages;
        let search = match self.lookup_for(&messages, mode, &cancel).await? {
            Some(bundle) => {
                sink.on_search(&bundle);
                inject_search_context(&mut messages, &bundle);
                Some(bundle)
            }
            None => None,
        };

        let request = ChatRequest::streaming(&self.config.model, messages, self.config.params);
        let chunks = self.open_with_retry(&request, &cancel).await?;
        let mut events = decode_chunks(chunks);

        let mut reply = AccumulatedReply::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!("Exchange cancelled mid-stream");
                    reply.finish();
                    return Err(cancelled(reply));
                }
                next = events.next() => match next {
                    Some(Ok(event)) => {
                        reply.apply(&event, |answer| sink.on_update(answer));
                        if reply.is_complete() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Chat stream failed: {}", e);
                        reply.finish();
                        return Err(Error::Stream {
                            source: e,
                            partial: Box::new(reply),
                        });
                    }
                    None => break,
                },
            }
        }
        drop(events);
        reply.finish();
        if cancel.is_cancelled() {
            return Err(cancelled(reply));
        }

        let final_reply = reply.resolve(&self.recovery);
        match final_reply.source {
            ReplySource::Reasoning { stage } => {
                tracing::info!("Answer channel was empty, reply recovered via {}", stage);
                sink.on_update(&final_reply.text);
            }
            ReplySource::Empty => tracing::warn!("Stream ended without any text"),
            ReplySource::Answer => {}
        }

        Ok(ExchangeOutcome {
            reply: final_reply,
            accumulated: reply,
            search,
        })
    }

    /// Run the lookup if one is wanted. Lookup failures degrade to `None`.
    async fn lookup_for(
        &self,
        messages: &[ChatMessage],
        mode: SearchMode,
        cancel: &CancellationToken,
    ) -> Result<Option<SearchBundle>> {
        let Some(backend) = &self.search else {
            return Ok(None);
        };
        let Some(user_text) = last_user_text(messages) else {
            return Ok(None);
        };
        if !mode.resolve(user_text, self.trigger.as_ref()) {
            return Ok(None);
        }

        let request = SearchRequest::new(user_text, &self.config.search);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(AccumulatedReply::new())),
            response = backend.search(&request) => response,
        };

        match response {
            Ok(response) => {
                let bundle = SearchBundle::from_response(request.search_query, response);
                if bundle.is_none() {
                    tracing::info!("Lookup returned no results, continuing without context");
                }
                Ok(bundle)
            }
            Err(e) => {
                tracing::warn!("Lookup failed, continuing without results: {}", e);
                Ok(None)
            }
        }
    }

    /// Open the chat stream, retrying transient failures before any byte is read.
    async fn open_with_retry(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled(AccumulatedReply::new())),
                opened = self.chat.open_stream(&self.config.model, request) => opened,
            };

            match opened {
                Ok(chunks) => return Ok(chunks),
                Err(e) if e.is_retryable() && attempt < retry.max_retries => {
                    let delay = retry.delay_for_attempt(attempt);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        retry.max_retries + 1,
                        e,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(cancelled(AccumulatedReply::new())),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(Error::Ai(e)),
            }
        }
    }
}

fn cancelled(partial: AccumulatedReply) -> Error {
    Error::Cancelled {
        partial: Box::new(partial),
    }
}

fn last_user_text(messages: &[ChatMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .filter(|text| !text.trim().is_empty())
}

/// Insert the lookup digest as a system instruction right before the last
/// user message.
pub fn inject_search_context(messages: &mut Vec<ChatMessage>, bundle: &SearchBundle) {
    let context = ChatMessage::system(bundle.context_message());
    match messages.iter().rposition(|m| m.role == Role::User) {
        Some(idx) => messages.insert(idx, context),
        None => messages.push(context),
    }
}
