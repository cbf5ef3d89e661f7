//! Streaming event types and the per-exchange reply accumulator

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_stream::Stream;

use crate::error::{Error, Result};
use crate::recovery::ReasoningRecovery;
use crate::sse::{SseFrame, SseReader};

/// Raw transport chunks as they arrive from the network
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Decoded stream events
pub type StreamEventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// One decoded frame of the chat stream
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamEvent {
    /// Fragment of the answer channel (`delta.content`)
    pub answer: Option<String>,
    /// Fragment of the reasoning channel (`delta.reasoning_content`)
    pub reasoning: Option<String>,
    /// Tool invocations requested by the model, kept opaque
    pub tool_invocations: Vec<Value>,
    /// Finish reason reported by the upstream, if any
    pub finish_reason: Option<String>,
    /// Marks the end-of-stream sentinel
    pub terminal: bool,
}

/// A single content fragment carried by an event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment<'a> {
    /// Text for the answer channel
    Answer(&'a str),
    /// Text for the reasoning channel
    Reasoning(&'a str),
    /// A tool invocation. Recorded, never executed.
    ToolInvocation(&'a Value),
}

impl StreamEvent {
    /// The end-of-stream event
    pub fn terminal() -> Self {
        Self {
            terminal: true,
            ..Default::default()
        }
    }

    /// An event carrying only an answer fragment
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            answer: Some(text.into()),
            ..Default::default()
        }
    }

    /// An event carrying only a reasoning fragment
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Default::default()
        }
    }

    /// Decode a chat-completion chunk payload.
    pub fn from_payload(payload: Value) -> std::result::Result<Self, serde_json::Error> {
        let chunk: StreamChunk = serde_json::from_value(payload)?;
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(Self::default());
        };

        Ok(Self {
            answer: choice.delta.content.filter(|s| !s.is_empty()),
            reasoning: choice.delta.reasoning_content.filter(|s| !s.is_empty()),
            tool_invocations: choice.delta.tool_calls.unwrap_or_default(),
            finish_reason: choice.finish_reason,
            terminal: false,
        })
    }

    /// Fragments carried by this event, answer first
    pub fn fragments(&self) -> Vec<Fragment<'_>> {
        let mut fragments = Vec::new();
        if let Some(ref answer) = self.answer {
            fragments.push(Fragment::Answer(answer));
        }
        if let Some(ref reasoning) = self.reasoning {
            fragments.push(Fragment::Reasoning(reasoning));
        }
        fragments.extend(self.tool_invocations.iter().map(Fragment::ToolInvocation));
        fragments
    }
}

/// Where the final displayed text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    /// The answer channel
    Answer,
    /// Recovered from the reasoning channel by the named stage
    Reasoning { stage: &'static str },
    /// Neither channel produced text
    Empty,
}

/// The finalized reply of one exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReply {
    pub text: String,
    pub source: ReplySource,
}

/// Mutable state of one in-flight exchange.
///
/// Owned by the task that opened the stream. Both buffers are append-only and
/// freeze once the reply is complete.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccumulatedReply {
    answer: String,
    reasoning: String,
    tool_invocations: Vec<Value>,
    finish_reason: Option<String>,
    complete: bool,
}

impl AccumulatedReply {
    /// Create an empty reply
    pub fn new() -> Self {
        Self::default()
    }

    /// Route an event's fragments into the buffers.
    ///
    /// `on_update` receives the full accumulated answer each time the answer
    /// buffer grows. Reasoning is never surfaced here.
    pub fn apply(&mut self, event: &StreamEvent, mut on_update: impl FnMut(&str)) {
        if self.complete {
            tracing::debug!("Ignoring event after reply was finalized");
            return;
        }

        for fragment in event.fragments() {
            match fragment {
                Fragment::Answer(text) => {
                    self.answer.push_str(text);
                    on_update(&self.answer);
                }
                Fragment::Reasoning(text) => {
                    self.reasoning.push_str(text);
                }
                Fragment::ToolInvocation(call) => {
                    tracing::debug!("Model requested tool invocation (not executed): {}", call);
                    self.tool_invocations.push(call.clone());
                }
            }
        }

        if let Some(ref reason) = event.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
        if event.terminal {
            self.complete = true;
        }
    }

    /// Freeze the reply. Later events are ignored.
    pub fn finish(&mut self) {
        self.complete = true;
    }

    /// Accumulated answer text
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Accumulated reasoning text
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    /// Tool invocations observed during the stream
    pub fn tool_invocations(&self) -> &[Value] {
        &self.tool_invocations
    }

    /// Last finish reason reported by the upstream
    pub fn finish_reason(&self) -> Option<&str> {
        self.finish_reason.as_deref()
    }

    /// Whether the terminal event was seen or the reply was finished
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether any text arrived on either channel
    pub fn has_text(&self) -> bool {
        !self.answer.is_empty() || !self.reasoning.is_empty()
    }

    /// Pick the displayed text. The answer wins whenever it is non-empty;
    /// reasoning is only consulted as a fallback and never merged in.
    pub fn resolve(&self, recovery: &ReasoningRecovery) -> FinalReply {
        if !self.answer.is_empty() {
            return FinalReply {
                text: self.answer.clone(),
                source: ReplySource::Answer,
            };
        }

        if !self.reasoning.is_empty() {
            let recovered = recovery.recover(&self.reasoning);
            return FinalReply {
                text: recovered.text,
                source: ReplySource::Reasoning {
                    stage: recovered.stage,
                },
            };
        }

        FinalReply {
            text: String::new(),
            source: ReplySource::Empty,
        }
    }
}

/// Turn raw transport chunks into decoded stream events.
///
/// Malformed payloads are skipped by the reader. A transport error is yielded
/// after the residual buffer has had its final parse, and ends the stream. The
/// terminal event, when seen, is always the last item.
pub fn decode_chunks(mut chunks: ChunkStream) -> StreamEventStream {
    Box::pin(stream! {
        let mut reader = SseReader::new();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => {
                    for item in frames_to_events(reader.feed(&bytes)) {
                        match item {
                            Ok(event) => yield Ok(event),
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    if reader.is_done() {
                        return;
                    }
                }
                Err(e) => {
                    for item in frames_to_events(reader.finish()) {
                        match item {
                            Ok(event) => yield Ok(event),
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        }
                    }
                    yield Err(e);
                    return;
                }
            }
        }

        for item in frames_to_events(reader.finish()) {
            match item {
                Ok(event) => yield Ok(event),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

fn frames_to_events(frames: Vec<SseFrame>) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::with_capacity(frames.len());
    for frame in frames {
        match frame {
            SseFrame::Done => {
                events.push(Ok(StreamEvent::terminal()));
                break;
            }
            SseFrame::Data(payload) => {
                if let Some(message) = upstream_error_message(&payload) {
                    events.push(Err(Error::UnexpectedResponse(message)));
                    break;
                }
                match StreamEvent::from_payload(payload) {
                    Ok(event) => events.push(Ok(event)),
                    Err(e) => tracing::warn!("Skipping stream payload with unexpected shape: {}", e),
                }
            }
        }
    }
    events
}

fn upstream_error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    if let Some(message) = error.get("message").and_then(|m| m.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recovery::RecoveryConfig;
    use serde_json::json;

    fn chunks(parts: Vec<Result<String>>) -> ChunkStream {
        Box::pin(futures::stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(String::into_bytes))
                .collect::<Vec<_>>(),
        ))
    }

    fn data(payload: Value) -> String {
        format!("data: {}\n\n", payload)
    }

    fn answer_chunk(text: &str) -> Value {
        json!({"choices": [{"delta": {"content": text}}]})
    }

    fn reasoning_chunk(text: &str) -> Value {
        json!({"choices": [{"delta": {"reasoning_content": text}}]})
    }

    async fn collect(stream: StreamEventStream) -> Vec<Result<StreamEvent>> {
        stream.collect().await
    }

    #[test]
    fn test_from_payload_channels() {
        let event = StreamEvent::from_payload(json!({
            "choices": [{
                "delta": {"content": "hi", "reasoning_content": "think"},
                "finish_reason": "stop"
            }]
        }))
        .unwrap();
        assert_eq!(event.answer.as_deref(), Some("hi"));
        assert_eq!(event.reasoning.as_deref(), Some("think"));
        assert_eq!(event.finish_reason.as_deref(), Some("stop"));
        assert!(!event.terminal);
    }

    #[test]
    fn test_from_payload_empty_strings_are_absent() {
        let event = StreamEvent::from_payload(json!({
            "choices": [{"delta": {"content": "", "reasoning_content": ""}}]
        }))
        .unwrap();
        assert!(event.fragments().is_empty());
    }

    #[test]
    fn test_from_payload_without_choices() {
        let event = StreamEvent::from_payload(json!({"id": "abc"})).unwrap();
        assert_eq!(event, StreamEvent::default());
    }

    #[test]
    fn test_from_payload_rejects_non_object() {
        assert!(StreamEvent::from_payload(json!(42)).is_err());
    }

    #[test]
    fn test_fragments_include_tool_invocations() {
        let event = StreamEvent::from_payload(json!({
            "choices": [{"delta": {"tool_calls": [{"id": "call_1", "function": {"name": "web_search"}}]}}]
        }))
        .unwrap();
        let fragments = event.fragments();
        assert_eq!(fragments.len(), 1);
        assert!(matches!(fragments[0], Fragment::ToolInvocation(_)));
    }

    #[test]
    fn test_apply_reports_cumulative_answer() {
        let fragments = ["Hel", "lo", ", ", "wor", "ld"];
        let mut reply = AccumulatedReply::new();
        let mut updates = Vec::new();
        for fragment in fragments {
            reply.apply(&StreamEvent::answer(fragment), |text| updates.push(text.to_string()));
        }

        let mut expected = String::new();
        for (i, fragment) in fragments.iter().enumerate() {
            expected.push_str(fragment);
            assert_eq!(updates[i], expected);
        }
        assert_eq!(reply.answer(), "Hello, world");
    }

    #[test]
    fn test_apply_reasoning_is_silent() {
        let mut reply = AccumulatedReply::new();
        let mut calls = 0;
        reply.apply(&StreamEvent::reasoning("first "), |_| calls += 1);
        reply.apply(&StreamEvent::reasoning("second"), |_| calls += 1);
        assert_eq!(calls, 0);
        assert_eq!(reply.reasoning(), "first second");
        assert!(reply.answer().is_empty());
    }

    #[test]
    fn test_apply_tool_invocation_is_noop_for_buffers() {
        let mut reply = AccumulatedReply::new();
        let event = StreamEvent {
            tool_invocations: vec![json!({"id": "call_1"})],
            ..Default::default()
        };
        let mut calls = 0;
        reply.apply(&event, |_| calls += 1);
        assert_eq!(calls, 0);
        assert!(!reply.has_text());
        assert!(!reply.is_complete());
        assert_eq!(reply.tool_invocations().len(), 1);
    }

    #[test]
    fn test_terminal_freezes_reply() {
        let mut reply = AccumulatedReply::new();
        reply.apply(&StreamEvent::answer("done"), |_| {});
        reply.apply(&StreamEvent::terminal(), |_| {});
        assert!(reply.is_complete());

        let mut calls = 0;
        reply.apply(&StreamEvent::answer(" more"), |_| calls += 1);
        assert_eq!(calls, 0);
        assert_eq!(reply.answer(), "done");
    }

    #[test]
    fn test_resolve_answer_wins() {
        let mut reply = AccumulatedReply::new();
        reply.apply(&StreamEvent::reasoning("\"你好！\" would be a fine reply."), |_| {});
        reply.apply(&StreamEvent::answer("Hi there"), |_| {});
        let recovery = ReasoningRecovery::new(RecoveryConfig::default());
        let reply = reply.resolve(&recovery);
        assert_eq!(reply.text, "Hi there");
        assert_eq!(reply.source, ReplySource::Answer);
    }

    #[test]
    fn test_resolve_recovers_from_reasoning() {
        let mut reply = AccumulatedReply::new();
        reply.apply(&StreamEvent::reasoning("短回复"), |_| {});
        let recovery = ReasoningRecovery::new(RecoveryConfig::default());
        let reply = reply.resolve(&recovery);
        assert_eq!(reply.text, "短回复");
        assert!(matches!(reply.source, ReplySource::Reasoning { .. }));
    }

    #[test]
    fn test_resolve_empty() {
        let recovery = ReasoningRecovery::new(RecoveryConfig::default());
        let reply = AccumulatedReply::new().resolve(&recovery);
        assert_eq!(reply.source, ReplySource::Empty);
        assert!(reply.text.is_empty());
    }

    #[tokio::test]
    async fn test_decode_scenario_hello_world() {
        let body = format!(
            "{}{}data: [DONE]\n\n",
            data(answer_chunk("Hello")),
            data(answer_chunk(" world"))
        );
        let events = collect(decode_chunks(chunks(vec![Ok(body)]))).await;

        let mut reply = AccumulatedReply::new();
        let mut updates = Vec::new();
        for event in events {
            reply.apply(&event.unwrap(), |t| updates.push(t.to_string()));
        }
        assert_eq!(updates, vec!["Hello", "Hello world"]);
        assert_eq!(reply.answer(), "Hello world");
        assert!(reply.is_complete());
    }

    #[tokio::test]
    async fn test_decode_skips_unparseable_line() {
        let body = format!(
            "{}data: {{\"choices\": [oops\n\n{}data: [DONE]\n\n",
            data(answer_chunk("one")),
            data(answer_chunk(" two"))
        );
        let events = collect(decode_chunks(chunks(vec![Ok(body)]))).await;

        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.is_ok()));
        let mut reply = AccumulatedReply::new();
        for event in &events {
            reply.apply(event.as_ref().unwrap(), |_| {});
        }
        assert_eq!(reply.answer(), "one two");
    }

    #[tokio::test]
    async fn test_decode_stops_at_done() {
        let body = format!(
            "{}data: [DONE]\n\n{}",
            data(answer_chunk("kept")),
            data(answer_chunk("dropped"))
        );
        let events = collect(decode_chunks(chunks(vec![Ok(body), Ok("data: {}\n\n".into())]))).await;
        assert_eq!(events.len(), 2);
        assert!(events[1].as_ref().unwrap().terminal);
    }

    #[tokio::test]
    async fn test_decode_transport_error_after_residual() {
        let stream = chunks(vec![
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"part\"}}]}\n\n".into()),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"ial\"}}]}".into()),
            Err(Error::Transport("connection reset".into())),
            Ok("data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n".into()),
        ]);
        let events = collect(decode_chunks(stream)).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].as_ref().unwrap().answer.as_deref(), Some("part"));
        assert_eq!(events[1].as_ref().unwrap().answer.as_deref(), Some("ial"));
        assert!(matches!(events[2], Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_decode_exhaustion_without_sentinel() {
        let stream = chunks(vec![Ok("data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}".into())]);
        let events = collect(decode_chunks(stream)).await;
        assert_eq!(events.len(), 1);
        assert!(!events[0].as_ref().unwrap().terminal);
    }

    #[tokio::test]
    async fn test_decode_upstream_error_payload() {
        let stream = chunks(vec![Ok(
            "data: {\"error\":{\"code\":\"1301\",\"message\":\"content filtered\"}}\n\n".into(),
        )]);
        let events = collect(decode_chunks(stream)).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            Err(Error::UnexpectedResponse(msg)) => assert_eq!(msg, "content filtered"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_decode_reasoning_only_then_recover() {
        let reasoning = "1. **分析用户请求：** 用户发来了一句问候，希望得到简单的回应。\n\
                         2. **综合分析：** 这里需要礼貌、直接。\n\
                         3. **最终回答：\"你好！\"**\n";
        let body = format!("{}data: [DONE]\n\n", data(reasoning_chunk(reasoning)));
        let events = collect(decode_chunks(chunks(vec![Ok(body)]))).await;

        let mut reply = AccumulatedReply::new();
        let mut calls = 0;
        for event in events {
            reply.apply(&event.unwrap(), |_| calls += 1);
        }
        assert_eq!(calls, 0);
        let recovery = ReasoningRecovery::new(RecoveryConfig::default());
        assert_eq!(reply.resolve(&recovery).text, "你好！");
    }
}
