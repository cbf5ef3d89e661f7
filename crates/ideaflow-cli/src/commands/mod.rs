//! Slash commands for interactive mode

mod model;
mod search;
mod session;

pub use model::ModelCommand;
pub use search::SearchCommand;
pub use session::SessionCommand;

use ideaflow_ai::SearchMode;
use ideaflow_chat::Chat;

/// Result of executing a slash command
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    /// Start a fresh session
    NewSession,
    /// Change the lookup mode
    SetSearch(SearchMode),
    /// Show a message to the user (not sent upstream)
    Message(String),
    /// Exit the application
    Exit,
    /// Unknown command
    Unknown(String),
}

/// Parse and execute a slash command
pub fn execute_command(input: &str, chat: &Chat) -> Option<CommandResult> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let parts: Vec<&str> = rest.splitn(2, ' ').collect();
    let command = parts[0].to_lowercase();
    let args = parts.get(1).map(|s| s.trim()).unwrap_or("");

    Some(match command.as_str() {
        "help" | "h" | "?" => CommandResult::Message(help_message()),

        "new" | "clear" | "c" => CommandResult::NewSession,

        "quit" | "exit" | "q" => CommandResult::Exit,

        "models" | "model" | "m" => ModelCommand::execute(chat.model()),

        "search" | "web" => SearchCommand::execute(args, chat.search_mode()),

        "history" | "session" | "s" => SessionCommand::execute(chat),

        _ => CommandResult::Unknown(command),
    })
}

fn help_message() -> String {
    r#"Available commands:
  /help, /h, /?            Show this help message
  /new, /clear, /c         Start a new chat session
  /models, /m              List known models
  /search [on|off|auto]    Show or set web search mode
  /history, /session, /s   Show the current session
  /quit, /exit, /q         Exit

Press Ctrl-C while a reply is streaming to stop it."#
        .to_string()
}
