//! /history command - show session info and messages

use super::CommandResult;
use ideaflow_ai::{
    Role,
    utils::{collapse_whitespace, ellipsize},
};
use ideaflow_chat::{Chat, ChatSession, MessageKind};

const PREVIEW_CHARS: usize = 60;

pub struct SessionCommand;

impl SessionCommand {
    pub fn execute(chat: &Chat) -> CommandResult {
        CommandResult::Message(render_session(chat.session()))
    }
}

fn render_session(session: &ChatSession) -> String {
    let mut output = String::from("Session Info\n");
    output.push_str(&"-".repeat(40));
    output.push('\n');

    output.push_str(&format!("Title:      {}\n", session.title));
    output.push_str(&format!("Started:    {}\n", session.created_at.format("%Y-%m-%d %H:%M")));

    let user_msgs = session
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .count();
    let searches = session
        .messages
        .iter()
        .filter(|m| matches!(m.kind, MessageKind::SearchResults { .. }))
        .count();
    output.push_str(&format!("Messages:   {} total\n", session.messages.len()));
    output.push_str(&format!(
        "            {} user, {} assistant, {} searches\n",
        user_msgs,
        session.messages.len() - user_msgs,
        searches
    ));

    if session.messages.is_empty() {
        return output;
    }

    output.push('\n');
    for (i, message) in session.messages.iter().enumerate() {
        let label = match (&message.kind, message.role) {
            (MessageKind::SearchResults { .. }, _) => "search",
            (MessageKind::SearchSummary { .. }, _) => "summary",
            (MessageKind::Chat, Role::User) => "you",
            (MessageKind::Chat, _) => "assistant",
        };
        let flat = collapse_whitespace(&message.content);
        output.push_str(&format!(
            "{:>3}. [{}] {}\n",
            i + 1,
            label,
            ellipsize(&flat, PREVIEW_CHARS, "...")
        ));
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use ideaflow_ai::SearchBundle;
    use ideaflow_chat::SessionMessage;

    #[test]
    fn test_empty_session() {
        let text = render_session(&ChatSession::new());
        assert!(text.contains("Title:      New chat"));
        assert!(text.contains("0 total"));
    }

    #[test]
    fn test_lists_messages_with_labels() {
        let mut session = ChatSession::new();
        session.push(SessionMessage::user("今天的黄金价格"));
        let bundle = SearchBundle {
            query: "今天的黄金价格".into(),
            formatted_text: "1. 金价\n   上涨".into(),
            structured_results: vec![],
        };
        session.push(SessionMessage::search_results(&bundle, "2025-01-02 10:00"));
        session.push(SessionMessage::assistant("x".repeat(100)));

        let text = render_session(&session);
        assert!(text.contains("1 user, 2 assistant, 1 searches"));
        assert!(text.contains("  1. [you] 今天的黄金价格"));
        assert!(text.contains("  2. [search] 1. 金价 上涨"));
        assert!(text.contains(&format!("  3. [assistant] {}...", "x".repeat(60))));
    }
}
