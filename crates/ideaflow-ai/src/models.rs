//! Model registry for the GLM models the assistant can talk to.

use crate::Model;

/// Base URL of the hosted GLM API
pub const GLM_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Model used when nothing else is configured
pub const DEFAULT_MODEL_ID: &str = "glm-4.6";

struct ModelEntry {
    id: &'static str,
    name: &'static str,
    reasoning: bool,
    context_window: u32,
    max_tokens: u32,
}

const MODEL_ENTRIES: &[ModelEntry] = &[
    ModelEntry {
        id: "glm-4.6",
        name: "GLM-4.6",
        reasoning: true,
        context_window: 200_000,
        max_tokens: 128_000,
    },
    ModelEntry {
        id: "glm-4.5",
        name: "GLM-4.5",
        reasoning: true,
        context_window: 128_000,
        max_tokens: 96_000,
    },
    ModelEntry {
        id: "glm-4.5-air",
        name: "GLM-4.5-Air",
        reasoning: true,
        context_window: 128_000,
        max_tokens: 96_000,
    },
    ModelEntry {
        id: "glm-4-flash",
        name: "GLM-4-Flash",
        reasoning: false,
        context_window: 128_000,
        max_tokens: 4_096,
    },
];

impl ModelEntry {
    fn to_model(&self, base_url: &str) -> Model {
        Model {
            id: self.id.to_string(),
            name: self.name.to_string(),
            base_url: base_url.to_string(),
            reasoning: self.reasoning,
            context_window: self.context_window,
            max_tokens: self.max_tokens,
        }
    }
}

/// Get all registered models.
pub fn get_all_models() -> Vec<Model> {
    MODEL_ENTRIES.iter().map(|e| e.to_model(GLM_BASE_URL)).collect()
}

/// The default model.
pub fn default_model() -> Model {
    resolve_model(DEFAULT_MODEL_ID, None)
}

/// Construct a model for an ID the registry does not know about.
pub fn custom_model(id: &str, base_url: &str) -> Model {
    Model {
        id: id.to_string(),
        name: id.to_string(),
        base_url: base_url.to_string(),
        reasoning: false,
        context_window: 128_000,
        max_tokens: 8_192,
    }
}

/// Resolve a model by ID, falling back to a custom entry, and point it at `base_url`.
pub fn resolve_model(id: &str, base_url: Option<&str>) -> Model {
    let base = base_url.unwrap_or(GLM_BASE_URL);
    match MODEL_ENTRIES.iter().find(|e| e.id == id) {
        Some(entry) => entry.to_model(base),
        None => custom_model(id, base),
    }
}
