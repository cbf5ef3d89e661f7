//! Web-search lookup: request/response shapes, normalization and triggering

use serde::{Deserialize, Serialize};

use crate::utils::{collapse_whitespace, ellipsize, truncate_chars};

/// Maximum number of normalized results kept from one lookup
pub const MAX_RESULTS: usize = 5;

/// Summary length used in the compact search summary
const SUMMARY_PREVIEW_CHARS: usize = 160;

/// One normalized lookup hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
}

/// Output of one successful lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBundle {
    /// Query that was sent upstream (already truncated)
    pub query: String,
    /// Human-readable digest, one line per result
    pub formatted_text: String,
    /// At most [`MAX_RESULTS`] results in upstream order
    pub structured_results: Vec<SearchResult>,
}

impl SearchBundle {
    /// Build a bundle from a raw response. `None` when there are no usable hits.
    pub fn from_response(query: impl Into<String>, response: SearchResponse) -> Option<Self> {
        let structured_results = normalize_results(response.search_result);
        if structured_results.is_empty() {
            return None;
        }
        Some(Self {
            query: query.into(),
            formatted_text: format_digest(&structured_results),
            structured_results,
        })
    }

    /// Instruction injected ahead of the user's message so the model can ground
    /// its answer in the fetched content.
    pub fn context_message(&self) -> String {
        format!(
            "以下是与用户问题相关的最新联网搜索结果，请结合这些信息回答，并在适当时注明来源：\n{}",
            self.formatted_text
        )
    }

    /// Compact per-result summary shown after the raw results.
    pub fn summary(&self, timestamp: Option<&str>) -> String {
        let lines: Vec<String> = self
            .structured_results
            .iter()
            .enumerate()
            .map(|(i, result)| {
                let headline = [&result.title, &result.source]
                    .into_iter()
                    .map(|s| collapse_whitespace(s))
                    .find(|s| !s.is_empty())
                    .unwrap_or_else(|| format!("结果 {}", i + 1));
                let summary = match collapse_whitespace(&result.summary) {
                    s if s.is_empty() => "暂无摘要".to_string(),
                    s => ellipsize(&s, SUMMARY_PREVIEW_CHARS, "…"),
                };
                format!("{}. {}：{}", i + 1, headline, summary)
            })
            .collect();

        let mut out = String::from("📌 搜索综合总结");
        if let Some(ts) = timestamp {
            out.push_str(&format!(" （更新于 {}）", ts));
        }
        out.push('\n');
        if !self.query.is_empty() {
            out.push_str(&format!("查询：{}\n", self.query));
        }
        out.push_str(&lines.join("\n"));
        out.push_str("\n\n（以上结论基于最新联网搜索结果）");
        out
    }
}

/// Lookup parameters sent with every query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub engine: String,
    pub intent: bool,
    pub count: u32,
    pub content_size: String,
    /// The user's message is truncated to this many chars to form the query
    pub max_query_chars: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            engine: "search_std".to_string(),
            intent: true,
            count: 8,
            content_size: "medium".to_string(),
            max_query_chars: 70,
        }
    }
}

/// Body of the upstream lookup call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchRequest {
    pub search_query: String,
    pub search_engine: String,
    pub search_intent: bool,
    pub count: u32,
    pub content_size: String,
}

impl SearchRequest {
    /// Build a lookup request for a user message
    pub fn new(message: &str, options: &SearchOptions) -> Self {
        Self {
            search_query: truncate_chars(message.trim(), options.max_query_chars).to_string(),
            search_engine: options.engine.clone(),
            search_intent: options.intent,
            count: options.count,
            content_size: options.content_size.clone(),
        }
    }
}

/// Raw lookup response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default, alias = "results")]
    pub search_result: Vec<RawSearchHit>,
}

/// One raw hit as returned upstream
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSearchHit {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, alias = "body")]
    pub content: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default, alias = "source")]
    pub media: Option<String>,
    #[serde(default)]
    pub publish_date: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| collapse_whitespace(&s))
        .filter(|s| !s.is_empty())
}

/// Keep the first [`MAX_RESULTS`] hits in upstream order and fill in defaults.
pub fn normalize_results(hits: Vec<RawSearchHit>) -> Vec<SearchResult> {
    hits.into_iter()
        .take(MAX_RESULTS)
        .map(|hit| {
            let link = non_empty(hit.link);
            let source = non_empty(hit.media)
                .or_else(|| link.as_deref().and_then(host_of))
                .unwrap_or_else(|| "未知来源".to_string());
            SearchResult {
                title: non_empty(hit.title).unwrap_or_else(|| "无标题".to_string()),
                summary: non_empty(hit.content).unwrap_or_default(),
                link,
                source,
                published_at: non_empty(hit.publish_date),
            }
        })
        .collect()
}

fn host_of(link: &str) -> Option<String> {
    let rest = link.split_once("://").map(|(_, r)| r).unwrap_or(link);
    let host = rest.split(['/', '?', '#']).next()?;
    (!host.is_empty()).then(|| host.to_string())
}

/// One line per result: `index. title (date) — source — link — summary`.
/// Absent parts are left out.
pub fn format_digest(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut line = format!("{}. {}", i + 1, r.title);
            if let Some(date) = &r.published_at {
                line.push_str(&format!(" ({})", date));
            }
            line.push_str(&format!(" — {}", r.source));
            if let Some(link) = &r.link {
                line.push_str(&format!(" — {}", link));
            }
            if !r.summary.is_empty() {
                line.push_str(&format!(" — {}", r.summary));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decides whether a message should trigger a lookup when the caller has not
/// said explicitly.
pub trait SearchTrigger: Send + Sync {
    fn should_search(&self, message: &str) -> bool;
}

impl<F> SearchTrigger for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn should_search(&self, message: &str) -> bool {
        self(message)
    }
}

/// Triggers on recency, news, time and price related terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTrigger {
    keywords: Vec<String>,
}

impl Default for KeywordTrigger {
    fn default() -> Self {
        Self::new(default_keywords())
    }
}

impl KeywordTrigger {
    pub fn new(keywords: Vec<String>) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}

impl SearchTrigger for KeywordTrigger {
    fn should_search(&self, message: &str) -> bool {
        let lower = message.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }
}

/// Default trigger terms
pub fn default_keywords() -> Vec<String> {
    [
        "最新", "今天", "今日", "昨天", "现在", "目前", "当前", "实时", "最近", "近期", "新闻",
        "消息", "动态", "价格", "股价", "汇率", "天气", "比分", "发布", "今年", "本周", "2024",
        "2025", "latest", "today", "yesterday", "now", "current", "recent", "news", "price",
        "weather", "this week", "this year",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Whether a given exchange performs a lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Defer to the configured [`SearchTrigger`]
    #[default]
    Auto,
    On,
    Off,
}

impl SearchMode {
    /// Resolve the mode for one message
    pub fn resolve(self, message: &str, trigger: &dyn SearchTrigger) -> bool {
        match self {
            SearchMode::On => true,
            SearchMode::Off => false,
            SearchMode::Auto => trigger.should_search(message),
        }
    }
}

impl std::str::FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(SearchMode::Auto),
            "on" | "true" | "yes" => Ok(SearchMode::On),
            "off" | "false" | "no" => Ok(SearchMode::Off),
            other => Err(format!("unknown search mode: {}", other)),
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SearchMode::Auto => "auto",
            SearchMode::On => "on",
            SearchMode::Off => "off",
        };
        f.write_str(s)
    }
}
