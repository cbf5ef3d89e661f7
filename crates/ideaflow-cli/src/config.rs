//! Configuration file support

use ideaflow_ai::{
    GenerationParams, KeywordTrigger, RecoveryConfig, SearchMode, SearchOptions,
    models::DEFAULT_MODEL_ID, providers::glm::API_KEY_ENV,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for ideaflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// API base URL (defaults to the hosted GLM endpoint)
    pub base_url: Option<String>,
    /// API key (alternative to the GLM_API_KEY environment variable)
    pub api_key: Option<String>,
    /// System prompt sent ahead of every conversation
    pub system_prompt: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens per reply
    pub max_tokens: Option<u32>,
    /// Number of recent messages sent with each exchange
    pub history_limit: Option<usize>,
    /// Web search settings
    pub search: SearchSettings,
    /// Reasoning recovery tuning
    pub recovery: RecoveryConfig,
}

/// Web search configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// auto, on or off
    pub mode: SearchMode,
    pub engine: Option<String>,
    pub count: Option<u32>,
    pub content_size: Option<String>,
    /// Terms that trigger a lookup in auto mode (replaces the built-in list)
    pub keywords: Option<Vec<String>>,
}

impl SearchSettings {
    /// Lookup parameters with defaults filled in
    pub fn options(&self) -> SearchOptions {
        let mut options = SearchOptions::default();
        if let Some(ref engine) = self.engine {
            options.engine = engine.clone();
        }
        if let Some(count) = self.count {
            options.count = count;
        }
        if let Some(ref size) = self.content_size {
            options.content_size = size.clone();
        }
        options
    }

    /// Auto-mode trigger built from the configured keywords
    pub fn trigger(&self) -> KeywordTrigger {
        match self.keywords {
            Some(ref keywords) => KeywordTrigger::new(keywords.clone()),
            None => KeywordTrigger::default(),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ideaflow")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("IDEAFLOW_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults on any problem
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let defaults = GenerationParams::default();
        let default_config = Config {
            model: Some(DEFAULT_MODEL_ID.to_string()),
            temperature: Some(defaults.temperature),
            max_tokens: Some(defaults.max_tokens),
            history_limit: Some(ideaflow_chat::session::DEFAULT_HISTORY_LIMIT),
            ..Default::default()
        };

        default_config.save_to(&path)?;
        Ok(path)
    }

    /// Get the API key, checking config then env
    pub fn api_key(&self) -> Option<String> {
        ideaflow_ai::providers::get_api_key(self.api_key.as_deref(), API_KEY_ENV).ok()
    }

    /// Sampling parameters with defaults filled in
    pub fn params(&self) -> GenerationParams {
        let defaults = GenerationParams::default();
        GenerationParams {
            temperature: self.temperature.unwrap_or(defaults.temperature),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
        }
    }

    /// History window with the default filled in
    pub fn history_limit(&self) -> usize {
        self.history_limit
            .unwrap_or(ideaflow_chat::session::DEFAULT_HISTORY_LIMIT)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# ideaflow configuration file
# Place at ~/.config/ideaflow/config.toml (Linux) or set IDEAFLOW_CONFIG_PATH

# Default model to use (glm-4.6, glm-4.5, glm-4.5-air, glm-4-flash)
model = "glm-4.6"

# API base URL (optional)
# base_url = "https://open.bigmodel.cn/api/paas/v4"

# API key (optional - GLM_API_KEY is used when unset)
# api_key = "..."

# system_prompt = "You are a creative assistant that helps refine ideas."

temperature = 0.7
max_tokens = 2000

# Number of recent messages sent with each request
history_limit = 20

[search]
# auto: search when the message mentions news, prices, dates, ...
# on: search before every message, off: never search
mode = "auto"
engine = "search_std"
count = 8
content_size = "medium"
# keywords = ["最新", "今天", "news", "price"]

[recovery]
# Used when the model answers only in its reasoning channel.
# Spans containing any of these terms are never picked as the reply.
# denylist = ["请", "用户", "分析", "user", "analysis"]
short_reply_chars = 50
max_span_chars = 50
"#
}
