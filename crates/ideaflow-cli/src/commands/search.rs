//! /search command - show or change the web search mode

use super::CommandResult;
use ideaflow_ai::SearchMode;

pub struct SearchCommand;

impl SearchCommand {
    pub fn execute(args: &str, current: SearchMode) -> CommandResult {
        if args.is_empty() {
            return CommandResult::Message(format!(
                "Web search: {}\nUse /search on, /search off or /search auto",
                current
            ));
        }

        match args.parse::<SearchMode>() {
            Ok(mode) => CommandResult::SetSearch(mode),
            Err(e) => CommandResult::Message(format!("{} (expected on, off or auto)", e)),
        }
    }
}
