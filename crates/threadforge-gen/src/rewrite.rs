//! Rewrite a topic into a thread with one text-completion call.

use crate::extract::{ShapeError, extract_array, preview};
use crate::provider::{ChatMessage, LlmProvider, ProviderError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use threadforge_core::storage::ArtifactStore;
use threadforge_core::{Thread, Topic, Tweet};

/// Output language of a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewriteVariant {
    /// Chinese thread, same language as the source topics.
    #[default]
    Native,
    /// English thread.
    Translated,
}

impl RewriteVariant {
    /// Label used in report names and logs.
    pub fn label(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Translated => "translated",
        }
    }

    pub fn temperature(self) -> f32 {
        match self {
            Self::Native => 0.7,
            Self::Translated => 0.8,
        }
    }

    pub fn system_prompt(self) -> &'static str {
        match self {
            Self::Native => NATIVE_SYSTEM,
            Self::Translated => TRANSLATED_SYSTEM,
        }
    }

    pub fn default_template(self) -> &'static str {
        match self {
            Self::Native => NATIVE_TEMPLATE,
            Self::Translated => TRANSLATED_TEMPLATE,
        }
    }
}

/// Errors from a single rewrite.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("topic title is empty")]
    EmptyTitle,
    #[error("rewrite service error: {0}")]
    Service(#[from] ProviderError),
    #[error("rewrite output rejected: {0}")]
    Shape(#[from] ShapeError),
}

impl RewriteError {
    /// Only upstream failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Service(_))
    }
}

const NATIVE_SYSTEM: &str = "你是一位专业的社交媒体内容创作者，擅长把资讯改写成 Twitter Thread。\
只输出要求的 JSON 数组，不要输出其他内容。";

const TRANSLATED_SYSTEM: &str = "You are a professional social media writer who turns news into \
engaging English Twitter threads. Output only the requested JSON array.";

const NATIVE_TEMPLATE: &str = r#"请将以下内容改写为 Twitter Thread 格式，要求：

1. **Thread 结构**：
   - 第1条：吸引人的开头，包含核心观点和钩子
   - 中间几条：展开详细内容，每条推文控制在280字符以内
   - 最后1条：总结和行动号召

2. **内容要求**：
   - 保持原文的核心信息和价值
   - 使用口语化、适合社交媒体的语言
   - 添加适当的表情符号和话题标签
   - 每条推文都要有独立的价值

3. **输出格式**：
   返回一个包含{count}条推文的 JSON 数组，格式如下：
   ```json
   [
     {{"tweet": "第1条推文内容..."}},
     {{"tweet": "第2条推文内容..."}}
   ]
   ```

原始内容：
标题：{title}
描述：{description}
标签：{tags}
内容简介：{summary}
总结：{conclusion}
级别：{level} (1=Confirmed官方确认, 2=Likely可能属实, 3=Rumor传闻待证)

请开始改写："#;

const TRANSLATED_TEMPLATE: &str = r#"Please rewrite the following content into an English Twitter thread:

1. **Thread Structure**:
   - Tweet 1: compelling hook with the core insight
   - Middle tweets: detailed breakdown, each under 280 characters
   - Final tweet: summary and call to action

2. **Content Requirements**:
   - Keep the core information of the original
   - Conversational, social-media-friendly language
   - Appropriate emojis and relevant hashtags
   - Natural English, not a literal translation

3. **Output Format**:
   Return a JSON array with {count} tweets in this format:
   ```json
   [
     {{"tweet": "First tweet content..."}},
     {{"tweet": "Second tweet content..."}}
   ]
   ```

Original Content:
Title: {title}
Description: {description}
Tags: {tags}
Summary: {summary}
Conclusion: {conclusion}
Level: {level} (1=Confirmed, 2=Likely, 3=Rumor)

Please begin rewriting:"#;

/// Value for a template placeholder, or `None` if the name is unknown.
fn placeholder(name: &str, topic: &Topic, count: usize) -> Option<String> {
    let value = match name {
        "title" => topic.title.clone(),
        "description" => topic.controversy.clone(),
        "tags" => topic.keywords.clone(),
        "summary" => topic.summary.clone(),
        "conclusion" => topic.conclusion.clone(),
        "level" => topic.level.to_string(),
        "count" => count.to_string(),
        _ => return None,
    };
    Some(value)
}

/// Substitute topic fields into `template`.
///
/// `{{` and `}}` render as literal braces; unknown `{name}` tokens are kept verbatim.
pub fn render_template(template: &str, topic: &Topic, count: usize) -> String {
    let mut out = String::with_capacity(template.len() + 512);
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if tail.starts_with('{')
            && let Some(end) = tail.find('}')
            && let Some(value) = placeholder(&tail[1..end], topic, count)
        {
            out.push_str(&value);
            rest = &tail[end + 1..];
            continue;
        }

        // Lone brace: both delimiters are one byte.
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }
    out.push_str(rest);
    out
}

/// Load the rewrite template for `variant`, preferring `path` when it is readable.
pub fn load_template(variant: RewriteVariant, path: Option<&Path>) -> String {
    let Some(path) = path else {
        return variant.default_template().to_string();
    };
    match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => {
            tracing::info!("Loaded {} rewrite template from {}", variant.label(), path.display());
            content
        }
        Ok(_) => {
            tracing::warn!(
                "Rewrite template {} is empty, using the built-in default",
                path.display()
            );
            variant.default_template().to_string()
        }
        Err(e) => {
            tracing::warn!(
                "Cannot read rewrite template {} ({}), using the built-in default",
                path.display(),
                e
            );
            variant.default_template().to_string()
        }
    }
}

/// Decode a model reply into a thread.
///
/// Fails fast: an empty array, or any element without non-empty `tweet` text, rejects the
/// whole reply.
pub fn parse_thread(text: &str) -> Result<Thread, ShapeError> {
    let items = extract_array(text)?;
    if items.is_empty() {
        return Err(ShapeError::InvalidShape("thread is empty".into()));
    }

    let mut tweets = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let tweet = item
            .as_object()
            .and_then(|obj| obj.get("tweet"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ShapeError::InvalidShape(format!("tweet #{} has no `tweet` text", i + 1))
            })?;
        tweets.push(Tweet::new(tweet));
    }
    Ok(Thread(tweets))
}

/// Turns topics into threads.
pub struct RewritePipeline<'a> {
    provider: &'a dyn LlmProvider,
    variant: RewriteVariant,
    template: String,
    tweet_count: usize,
    max_tokens: u32,
    store: Option<ArtifactStore>,
}

impl<'a> RewritePipeline<'a> {
    pub fn new(provider: &'a dyn LlmProvider, variant: RewriteVariant) -> Self {
        Self {
            provider,
            variant,
            template: variant.default_template().to_string(),
            tweet_count: 6,
            max_tokens: 2000,
            store: None,
        }
    }

    #[must_use]
    pub fn with_template(mut self, template: String) -> Self {
        self.template = template;
        self
    }

    #[must_use]
    pub fn with_tweet_count(mut self, count: usize) -> Self {
        self.tweet_count = count;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Persist every thread produced by [`rewrite`](Self::rewrite) into `store`.
    #[must_use]
    pub fn with_store(mut self, store: ArtifactStore) -> Self {
        self.store = Some(store);
        self
    }

    /// The full user prompt for `topic`.
    pub fn build_prompt(&self, topic: &Topic) -> String {
        render_template(&self.template, topic, self.tweet_count)
    }

    /// One completion call, no persistence, no retries.
    pub fn generate_thread(&self, topic: &Topic) -> Result<Thread, RewriteError> {
        if topic.title.trim().is_empty() {
            return Err(RewriteError::EmptyTitle);
        }

        let messages = [
            ChatMessage::system(self.variant.system_prompt()),
            ChatMessage::user(self.build_prompt(topic)),
        ];
        let response =
            self.provider
                .complete(&messages, self.variant.temperature(), self.max_tokens)?;
        tracing::debug!(
            "Rewrite reply for '{}': {}",
            topic.title,
            preview(&response.text, 200)
        );

        let thread = parse_thread(&response.text)?;
        tracing::info!(
            "Rewrote '{}' into {} tweets ({})",
            topic.title,
            thread.len(),
            self.variant.label()
        );
        Ok(thread)
    }

    /// Rewrite and persist. A failed write is logged and leaves the file path empty.
    pub fn rewrite(&self, topic: &Topic) -> Result<(Thread, Option<PathBuf>), RewriteError> {
        let thread = self.generate_thread(topic)?;
        let file = self.store.as_ref().and_then(|store| {
            store
                .write_json("thread", Some(&topic.title), &thread)
                .map_err(|e| tracing::warn!("Failed to save thread for '{}': {}", topic.title, e))
                .ok()
        });
        Ok((thread, file))
    }
}
