//! /models command - list the known models

use super::CommandResult;
use ideaflow_ai::{Model, models::get_all_models};

pub struct ModelCommand;

impl ModelCommand {
    pub fn execute(current: &Model) -> CommandResult {
        CommandResult::Message(list_models(current, &get_all_models()))
    }
}

fn list_models(current: &Model, models: &[Model]) -> String {
    let mut output = String::from("Available models:\n");
    for model in models {
        let marker = if model.id == current.id { " *" } else { "" };
        let reasoning = if model.reasoning { ", reasoning" } else { "" };
        output.push_str(&format!(
            "  {:<14} {} ({}k context{}){}\n",
            model.id,
            model.name,
            model.context_window / 1000,
            reasoning,
            marker
        ));
    }

    if !models.iter().any(|m| m.id == current.id) {
        output.push_str(&format!("\nCurrent: {} (custom)\n", current.id));
    }
    output.push_str("\nStart with -m <id> to use another model.");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use ideaflow_ai::models::{default_model, resolve_model};

    #[test]
    fn test_current_model_is_marked() {
        let text = list_models(&default_model(), &get_all_models());
        let current = text.lines().find(|l| l.contains("glm-4.6")).unwrap();
        assert!(current.ends_with(" *"));
        assert!(current.contains("reasoning"));
        assert!(text.contains("glm-4-flash"));
        assert!(!text.contains("(custom)"));
    }

    #[test]
    fn test_custom_model_is_reported() {
        let custom = resolve_model("my-finetune", None);
        let text = list_models(&custom, &get_all_models());
        assert!(!text.contains(" *"));
        assert!(text.contains("Current: my-finetune (custom)"));
    }
}
