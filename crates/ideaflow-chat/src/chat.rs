//! Session-level chat driver

use std::sync::Arc;

use ideaflow_ai::{ChatMessage, FinalReply, Model, ReplySource, SearchBundle, SearchMode};
use tokio::sync::broadcast;

use crate::{
    error::{Error, Result},
    events::ChatEvent,
    exchange::{ChatEngine, ExchangeSink},
    handle::ExchangeHandle,
    session::{ChatSession, DEFAULT_HISTORY_LIMIT, SessionMessage},
};

/// Chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// System prompt sent ahead of the history
    pub system_prompt: Option<String>,
    /// Number of most recent session messages sent upstream
    pub history_limit: usize,
    /// Lookup mode for new exchanges
    pub search_mode: SearchMode,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            search_mode: SearchMode::Auto,
        }
    }
}

/// Drives exchanges for one session and records them in it.
pub struct Chat {
    engine: Arc<ChatEngine>,
    config: ChatConfig,
    session: ChatSession,
    event_tx: broadcast::Sender<ChatEvent>,
    handle: ExchangeHandle,
}

impl Chat {
    /// Create a chat with an empty session
    pub fn new(engine: Arc<ChatEngine>, config: ChatConfig) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            engine,
            config,
            session: ChatSession::new(),
            event_tx,
            handle: ExchangeHandle::new(),
        }
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    /// Get the current session
    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Get the chat config
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Start a fresh session and return the previous one
    pub fn new_session(&mut self) -> ChatSession {
        std::mem::take(&mut self.session)
    }

    /// Model used for exchanges
    pub fn model(&self) -> &Model {
        &self.engine.config().model
    }

    /// Set the lookup mode for later exchanges
    pub fn set_search_mode(&mut self, mode: SearchMode) {
        self.config.search_mode = mode;
    }

    pub fn search_mode(&self) -> SearchMode {
        self.config.search_mode
    }

    /// Get a cloneable handle for cancelling from outside
    pub fn handle(&self) -> ExchangeHandle {
        self.handle.clone()
    }

    /// Cancel the current exchange
    pub fn abort(&self) {
        self.handle.cancel();
    }

    /// Whether an exchange is currently running.
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Assemble the upstream message list from the session history.
    fn build_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(ref prompt) = self.config.system_prompt {
            if !prompt.trim().is_empty() {
                messages.push(ChatMessage::system(prompt.clone()));
            }
        }
        messages.extend(self.session.history(self.config.history_limit));
        messages
    }

    /// Send a user message and stream the reply into the session.
    ///
    /// On failure the assistant message ends up holding a short error text
    /// (or the partial answer if the exchange was cancelled after text
    /// arrived) and is no longer marked as streaming.
    pub async fn send(&mut self, input: &str) -> Result<FinalReply> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::Other("Message is empty".to_string()));
        }

        self.session.push(SessionMessage::user(input));
        let messages = self.build_messages();
        let placeholder_id = self.session.push(SessionMessage::placeholder());
        let session_id = self.session.id.clone();

        let cancel = self.handle.begin();
        let _ = self.event_tx.send(ChatEvent::ExchangeStart {
            session_id: session_id.clone(),
            message_id: placeholder_id.clone(),
        });

        // Settles the placeholder even if this future is dropped mid-exchange
        let mut sink = SessionSink {
            session: &mut self.session,
            session_id,
            placeholder_id,
            event_tx: &self.event_tx,
            handle: &self.handle,
            settled: false,
        };
        let result = self
            .engine
            .send(messages, self.config.search_mode, &mut sink, cancel)
            .await;

        match result {
            Ok(outcome) => {
                sink.complete(&outcome.reply);
                Ok(outcome.reply)
            }
            Err(e) => {
                tracing::warn!("Exchange failed: {}", e);
                sink.fail(failure_text(&e));
                Err(e)
            }
        }
    }
}

/// What the assistant message shows after a failed exchange.
fn failure_text(error: &Error) -> String {
    match error {
        Error::Cancelled { partial } if !partial.answer().is_empty() => {
            partial.answer().to_string()
        }
        _ => error.user_message(),
    }
}

/// Routes exchange callbacks into the session and out as events.
///
/// Also the exchange's cleanup guard: dropping it unsettled (the `send`
/// future was dropped) finalizes the placeholder as cancelled, and dropping
/// it in any state releases the handle.
struct SessionSink<'a> {
    session: &'a mut ChatSession,
    session_id: String,
    placeholder_id: String,
    event_tx: &'a broadcast::Sender<ChatEvent>,
    handle: &'a ExchangeHandle,
    settled: bool,
}

impl SessionSink<'_> {
    fn complete(&mut self, reply: &FinalReply) {
        self.session.update_message(&self.placeholder_id, &reply.text);
        self.session.finish_streaming(&self.placeholder_id);
        let recovered_by = match reply.source {
            ReplySource::Reasoning { stage } => Some(stage.to_string()),
            _ => None,
        };
        let _ = self.event_tx.send(ChatEvent::ReplyEnd {
            session_id: self.session_id.clone(),
            message_id: self.placeholder_id.clone(),
            content: reply.text.clone(),
            recovered_by,
        });
        self.settled = true;
    }

    fn fail(&mut self, text: String) {
        self.session.update_message(&self.placeholder_id, &text);
        self.session.finish_streaming(&self.placeholder_id);
        let _ = self.event_tx.send(ChatEvent::Error {
            session_id: self.session_id.clone(),
            message_id: self.placeholder_id.clone(),
            message: text,
        });
        self.settled = true;
    }
}

impl Drop for SessionSink<'_> {
    fn drop(&mut self) {
        if !self.settled {
            tracing::warn!("Exchange dropped before it finished");
            let partial = self
                .session
                .message(&self.placeholder_id)
                .map(|m| m.content.clone())
                .filter(|content| !content.is_empty());
            let text = partial.unwrap_or_else(|| {
                Error::Cancelled {
                    partial: Box::default(),
                }
                .user_message()
            });
            self.fail(text);
        }
        self.handle.finish();
    }
}

impl ExchangeSink for SessionSink<'_> {
    fn on_update(&mut self, answer: &str) {
        self.session.update_message(&self.placeholder_id, answer);
        let _ = self.event_tx.send(ChatEvent::ReplyUpdate {
            session_id: self.session_id.clone(),
            message_id: self.placeholder_id.clone(),
            content: answer.to_string(),
        });
    }

    fn on_search(&mut self, bundle: &SearchBundle) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.session.insert_before(
            &self.placeholder_id,
            SessionMessage::search_results(bundle, &timestamp),
        );
        self.session.insert_before(
            &self.placeholder_id,
            SessionMessage::search_summary(bundle, &timestamp),
        );
        let _ = self.event_tx.send(ChatEvent::SearchResults {
            session_id: self.session_id.clone(),
            bundle: bundle.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::tests::{
        MockChat, MockLookup, MockOpen, MockSearch, answer_line, done, fast_config, reasoning_line,
    };
    use crate::session::MessageKind;
    use ideaflow_ai::Role;
    use std::time::Duration;

    fn make_chat(chat: Arc<MockChat>, search: Option<Arc<MockSearch>>) -> Chat {
        let mut engine = ChatEngine::new(chat, fast_config());
        if let Some(search) = search {
            engine = engine.with_search(search);
        }
        Chat::new(
            Arc::new(engine),
            ChatConfig {
                system_prompt: Some("You are a helpful assistant.".into()),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_send_records_exchange() {
        let backend = Arc::new(MockChat::replying(vec![
            answer_line("Hello"),
            answer_line(" world"),
            done(),
        ]));
        let mut chat = make_chat(backend.clone(), None);
        let mut events = chat.subscribe();

        let reply = chat.send("hi there").await.unwrap();
        assert_eq!(reply.text, "Hello world");

        let session = chat.session();
        assert_eq!(session.title, "hi there");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].content, "Hello world");
        assert!(!session.messages[1].is_streaming);
        assert!(!chat.is_running());

        let sent = &backend.requests.lock()[0].messages;
        assert_eq!(sent[0].role, Role::System);
        assert_eq!(sent.last().map(|m| m.content.as_str()), Some("hi there"));

        let mut updates = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::ReplyUpdate { content, .. } = &event {
                updates.push(content.clone());
            }
            if event.is_terminal() {
                assert!(matches!(event, ChatEvent::ReplyEnd { recovered_by: None, .. }));
            }
        }
        assert_eq!(updates, vec!["Hello", "Hello world"]);
    }

    #[tokio::test]
    async fn test_search_messages_precede_reply() {
        let backend = Arc::new(MockChat::replying(vec![answer_line("答复"), done()]));
        let search = Arc::new(MockSearch::new(MockLookup::Hits(3)));
        let mut chat = make_chat(backend, Some(search));
        chat.set_search_mode(SearchMode::On);

        chat.send("最近有什么新闻").await.unwrap();

        let messages = &chat.session().messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::User);
        assert!(matches!(
            &messages[1].kind,
            MessageKind::SearchResults { results, .. } if results.len() == 3
        ));
        assert!(matches!(messages[2].kind, MessageKind::SearchSummary { .. }));
        assert!(messages[2].content.starts_with("📌 搜索综合总结"));
        assert_eq!(messages[3].content, "答复");
    }

    #[tokio::test]
    async fn test_recovered_reply_is_reported() {
        let reasoning = "这是一个很长的推理过程，我们需要认真思考对方到底想要什么样的回应才合适，\
                         同时还要兼顾礼貌和简洁。\n所以：你好呀！";
        assert!(reasoning.chars().count() >= 50);
        let backend = Arc::new(MockChat::replying(vec![reasoning_line(reasoning), done()]));
        let mut chat = make_chat(backend, None);
        let mut events = chat.subscribe();

        let reply = chat.send("你好").await.unwrap();
        assert_eq!(reply.text, "你好呀！");
        assert_eq!(chat.session().messages[1].content, "你好呀！");

        let mut recovered = None;
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::ReplyEnd { recovered_by, .. } = event {
                recovered = recovered_by;
            }
        }
        assert_eq!(recovered.as_deref(), Some("labeled_conclusion"));
    }

    #[tokio::test]
    async fn test_failure_substitutes_error_text() {
        let backend = Arc::new(MockChat::new(vec![MockOpen::Fail(
            ideaflow_ai::Error::from_status(401, "invalid", None),
        )]));
        let mut chat = make_chat(backend, None);

        let err = chat.send("hi").await.unwrap_err();
        assert_eq!(err.category(), ideaflow_ai::ErrorCategory::Auth);

        let placeholder = &chat.session().messages[1];
        assert_eq!(placeholder.content, "Invalid API key, please check your credentials.");
        assert!(!placeholder.is_streaming);
        assert!(!chat.is_running());
    }

    #[tokio::test]
    async fn test_abort_keeps_partial_answer() {
        let backend = Arc::new(MockChat::new(vec![MockOpen::Pending(vec![answer_line("部分")])]));
        let mut chat = make_chat(backend, None);
        let handle = chat.handle();
        let mut events = chat.subscribe();

        let canceller = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if matches!(event, ChatEvent::ReplyUpdate { .. }) {
                    handle.cancel();
                    break;
                }
            }
        });

        let err = tokio::time::timeout(Duration::from_secs(5), chat.send("hi"))
            .await
            .expect("abort released the exchange")
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, Error::Cancelled { .. }));
        let placeholder = &chat.session().messages[1];
        assert_eq!(placeholder.content, "部分");
        assert!(!placeholder.is_streaming);
    }

    #[tokio::test]
    async fn test_dropped_send_settles_placeholder() {
        let backend = Arc::new(MockChat::new(vec![MockOpen::Pending(vec![answer_line("部分")])]));
        let mut chat = make_chat(backend, None);
        let mut events = chat.subscribe();

        let elapsed = tokio::time::timeout(Duration::from_millis(200), chat.send("hi")).await;
        assert!(elapsed.is_err());

        assert!(!chat.is_running());
        let placeholder = &chat.session().messages[1];
        assert_eq!(placeholder.content, "部分");
        assert!(!placeholder.is_streaming);

        let mut terminal = None;
        while let Ok(event) = events.try_recv() {
            if event.is_terminal() {
                terminal = Some(event);
            }
        }
        assert!(matches!(
            terminal,
            Some(ChatEvent::Error { ref message, .. }) if message == "部分"
        ));
    }

    #[tokio::test]
    async fn test_dropped_send_without_text_reports_cancel() {
        let backend = Arc::new(MockChat::new(vec![MockOpen::Pending(vec![])]));
        let mut chat = make_chat(backend, None);

        let elapsed = tokio::time::timeout(Duration::from_millis(100), chat.send("hi")).await;
        assert!(elapsed.is_err());

        assert!(!chat.is_running());
        let placeholder = &chat.session().messages[1];
        assert_eq!(placeholder.content, "Request cancelled.");
        assert!(!placeholder.is_streaming);

        chat.send("again").await.unwrap();
        assert!(!chat.is_running());
        assert_eq!(chat.session().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_history_excludes_placeholder_and_is_bounded() {
        let backend = Arc::new(MockChat::new(vec![]));
        let mut chat = make_chat(backend.clone(), None);
        chat.config.history_limit = 4;

        for i in 0..4 {
            chat.send(&format!("q{}", i)).await.unwrap();
        }

        let requests = backend.requests.lock();
        let last = &requests[3].messages;
        // system + last 4 stored messages minus empty assistant replies
        assert_eq!(last[0].role, Role::System);
        assert!(last.iter().all(|m| !m.content.is_empty()));
        assert_eq!(last.last().map(|m| m.content.as_str()), Some("q3"));
        assert!(last.len() <= 5);
    }

    #[tokio::test]
    async fn test_empty_input_rejected() {
        let mut chat = make_chat(Arc::new(MockChat::new(vec![])), None);
        assert!(chat.send("   ").await.is_err());
        assert!(chat.session().messages.is_empty());
    }

    #[test]
    fn test_new_session_returns_previous() {
        let mut chat = make_chat(Arc::new(MockChat::new(vec![])), None);
        let first_id = chat.session().id.clone();
        let previous = chat.new_session();
        assert_eq!(previous.id, first_id);
        assert_ne!(chat.session().id, first_id);
    }
}
