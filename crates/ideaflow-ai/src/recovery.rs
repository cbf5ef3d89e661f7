//! Recovering a short reply from a reasoning-only response
//!
//! Some reasoning models occasionally finish a turn with an empty answer
//! channel and everything in `reasoning_content`. This module pulls a short,
//! displayable reply out of that transcript with an ordered list of stages;
//! the first stage that yields a candidate wins and a trailing-slice fallback
//! guarantees a non-empty result for non-empty input.
//!
//! This is a heuristic over free text: it is deterministic, but it is not a
//! parser and can pick the wrong span.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Name reported when no stage matched
pub const FALLBACK_STAGE: &str = "fallback";

/// Tuning for the recovery stages. Loaded from configuration because the
/// denylist depends on the output style of the model in use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Terms marking a span as restating the request or the model's analysis.
    /// Matched case-insensitively as substrings.
    pub denylist: Vec<String>,
    /// Reasoning shorter than this (in chars) is returned verbatim
    pub short_reply_chars: usize,
    /// Longest quoted span or labeled conclusion accepted (in chars)
    pub max_span_chars: usize,
    /// Shortest trailing sentence accepted (in chars)
    pub min_sentence_chars: usize,
    /// Longest trailing sentence accepted (in chars)
    pub max_sentence_chars: usize,
    /// Length of the trailing slice used as the last resort (in chars)
    pub fallback_tail_chars: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            denylist: default_denylist(),
            short_reply_chars: 50,
            max_span_chars: 50,
            min_sentence_chars: 2,
            max_sentence_chars: 50,
            fallback_tail_chars: 80,
        }
    }
}

/// Default meta-commentary terms, tuned against GLM-4.6 transcripts.
pub fn default_denylist() -> Vec<String> {
    [
        "请", "简单回复", "问候语", "分析", "用户", "请求", "核心", "任务", "关键词", "意图",
        "**", "please", "analysis", "analyze", "user", "request", "task", "keyword",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl RecoveryConfig {
    /// Whether `text` contains any denylisted term
    pub fn is_denied(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.denylist
            .iter()
            .filter(|term| !term.is_empty())
            .any(|term| lower.contains(&term.to_lowercase()))
    }
}

/// A single recovery stage: a pure function from reasoning text to a candidate.
pub type StageFn = fn(&str, &RecoveryConfig) -> Option<String>;

/// A named stage in the recovery pipeline
#[derive(Debug, Clone, Copy)]
pub struct RecoveryStage {
    pub name: &'static str,
    pub run: StageFn,
}

/// The stages in the order they are tried
pub fn default_stages() -> Vec<RecoveryStage> {
    vec![
        RecoveryStage {
            name: "short_circuit",
            run: short_circuit,
        },
        RecoveryStage {
            name: "quoted_span",
            run: quoted_span,
        },
        RecoveryStage {
            name: "labeled_conclusion",
            run: labeled_conclusion,
        },
        RecoveryStage {
            name: "trailing_sentence",
            run: trailing_sentence,
        },
    ]
}

/// Result of a recovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub text: String,
    /// Name of the stage that produced `text`
    pub stage: &'static str,
}

/// Ordered first-match-wins pipeline over reasoning text
#[derive(Debug, Clone)]
pub struct ReasoningRecovery {
    config: RecoveryConfig,
    stages: Vec<RecoveryStage>,
}

impl Default for ReasoningRecovery {
    fn default() -> Self {
        Self::new(RecoveryConfig::default())
    }
}

impl ReasoningRecovery {
    /// Create a pipeline with the default stages
    pub fn new(config: RecoveryConfig) -> Self {
        Self::with_stages(config, default_stages())
    }

    /// Create a pipeline with a custom stage list
    pub fn with_stages(config: RecoveryConfig, stages: Vec<RecoveryStage>) -> Self {
        Self { config, stages }
    }

    /// Get the config
    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    /// Get the stages in order
    pub fn stages(&self) -> &[RecoveryStage] {
        &self.stages
    }

    /// Recover a reply from `reasoning`.
    pub fn recover(&self, reasoning: &str) -> Recovered {
        for stage in &self.stages {
            if let Some(text) = (stage.run)(reasoning, &self.config).filter(|t| !t.is_empty()) {
                tracing::info!("Recovered reply from reasoning via {}", stage.name);
                return Recovered {
                    text,
                    stage: stage.name,
                };
            }
        }

        tracing::info!("No recovery stage matched, using trailing slice of reasoning");
        Recovered {
            text: trailing_slice(reasoning, self.config.fallback_tail_chars),
            stage: FALLBACK_STAGE,
        }
    }
}

static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""([^"\n]+)"|“([^”\n]+)”"#).expect("valid quoted-span regex"));

/// Phrases introducing a conclusion, most specific first.
static CONCLUSION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:最终回答|最终答案|最终回复|最终决定|\bfinal (?:answer|reply|response)\b)\s*(?:是|is)?\s*[：:]?\s*(?P<body>[^\n]+)",
        r"(?i)(?:回复|回答|答案|选择|\banswer\b|\breply\b)\s*[：:]\s*(?P<body>[^\n]+)",
        r"(?i)(?:因此|所以|最终|综上|\btherefore\b|\bthus\b|\bso\b)\s*[,，：:]\s*(?P<body>[^\n]+)",
        r"(?i)(?:最佳选项|最佳回复|最合适的回复|决定是|\bbest (?:choice|answer|reply|option) is\b)\s*[：:]?\s*(?P<body>[^\n]+)",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static SENTENCE_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[。！？!?\n]+|\.(?:\s+|$)").expect("valid sentence-split regex")
});

static LIST_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\d+\s*[.、)）]|[-*•#]|[（(]\d+[)）])").expect("valid list-marker regex")
});

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Stage 1: short reasoning is already presentable.
pub fn short_circuit(text: &str, config: &RecoveryConfig) -> Option<String> {
    (char_len(text) < config.short_reply_chars).then(|| text.to_string())
}

/// Stage 2: first quoted span of bounded length that is not meta-commentary.
pub fn quoted_span(text: &str, config: &RecoveryConfig) -> Option<String> {
    QUOTED.captures_iter(text).find_map(|caps| {
        let span = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
        let len = char_len(span);
        (len >= 1 && len <= config.max_span_chars && !config.is_denied(span))
            .then(|| span.to_string())
    })
}

/// Stage 3: a short span following a "final answer" / "therefore" style label.
pub fn labeled_conclusion(text: &str, config: &RecoveryConfig) -> Option<String> {
    for pattern in CONCLUSION_PATTERNS.iter() {
        for caps in pattern.captures_iter(text) {
            let Some(body) = caps.name("body") else {
                continue;
            };
            let Some(span) = conclusion_span(body.as_str()) else {
                continue;
            };
            let len = char_len(&span);
            if len >= 1 && len <= config.max_span_chars && !config.is_denied(&span) {
                return Some(span);
            }
        }
    }
    None
}

/// Stage 4: the last short sentence that is not a list item or meta-commentary.
pub fn trailing_sentence(text: &str, config: &RecoveryConfig) -> Option<String> {
    SENTENCE_SPLIT
        .split(text)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(str::trim)
        .find(|sentence| {
            let len = char_len(sentence);
            len >= config.min_sentence_chars
                && len <= config.max_sentence_chars
                && !LIST_MARKER.is_match(sentence)
                && !config.is_denied(sentence)
        })
        .map(str::to_string)
}

/// Narrow a labeled conclusion down to the reply itself: the quoted text when
/// the label is followed by a quote, otherwise up to the first sentence end.
fn conclusion_span(body: &str) -> Option<String> {
    let body = body.trim();
    let mut chars = body.char_indices();
    let (_, first) = chars.next()?;

    let span = if first == '"' || first == '“' {
        let close = if first == '"' { '"' } else { '”' };
        let rest = &body[first.len_utf8()..];
        match rest.find(close) {
            Some(end) => &rest[..end],
            None => rest,
        }
    } else {
        match body.char_indices().find(|(_, c)| matches!(c, '。' | '！' | '？' | '!' | '?')) {
            Some((idx, c)) => &body[..idx + c.len_utf8()],
            None => body,
        }
    };

    let span = span.trim().trim_matches('*').trim();
    (!span.is_empty()).then(|| span.to_string())
}

/// Last `max_chars` characters of `text`, trimmed. Never empty for non-empty input.
fn trailing_slice(text: &str, max_chars: usize) -> String {
    let total = char_len(text);
    let start = text
        .char_indices()
        .nth(total.saturating_sub(max_chars))
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let tail = &text[start..];
    let trimmed = tail.trim();
    if trimmed.is_empty() {
        let whole = text.trim();
        if whole.is_empty() {
            tail.to_string()
        } else {
            whole.to_string()
        }
    } else {
        trimmed.to_string()
    }
}
