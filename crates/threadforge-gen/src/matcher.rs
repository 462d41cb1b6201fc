//! Image-style template catalog and topic-to-template matching.
//!
//! The catalog is a markdown document of `## 案例 N：Title` sections, each holding one
//! fenced prompt block. Matching asks the model to pick a case number, and falls back to
//! keyword scoring when that fails. The fallback always yields a template for a non-empty
//! catalog.

use crate::extract::preview;
use crate::provider::{ChatMessage, LlmProvider};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use threadforge_core::{Template, Topic};

/// Title keyword → derived match keywords.
const KEYWORD_TABLE: &[(&str, &[&str])] = &[
    ("广告", &["广告", "营销", "宣传", "推广"]),
    ("海报", &["海报", "宣传", "设计"]),
    ("名片", &["名片", "商务", "联系"]),
    ("3D", &["3D", "立体", "渲染"]),
    ("水晶球", &["水晶球", "场景", "故事"]),
    ("书架", &["书架", "家具", "Logo"]),
    ("冰棒", &["冰棒", "食品", "创意"]),
    ("推文", &["推文", "社交", "截图"]),
    ("矢量", &["矢量", "艺术", "插画"]),
    ("建筑", &["建筑", "迷你", "Q版"]),
    ("信息图", &["信息图", "卡片", "手绘"]),
    ("折叠", &["折叠", "纸雕", "立体"]),
    ("小红书", &["小红书", "封面", "社交"]),
    ("极简", &["极简", "未来", "海报"]),
    ("复古", &["复古", "宣传", "海报"]),
    ("键盘", &["键盘", "键帽", "品牌"]),
    ("徽章", &["徽章", "emoji", "金属"]),
    ("字母", &["字母", "融合", "创意"]),
];

const MATCH_TEMPERATURE: f32 = 0.3;
const MATCH_MAX_TOKENS: u32 = 50;
const CUSTOMIZE_TEMPERATURE: f32 = 0.7;

/// Errors from loading the catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to read template catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// No template could be resolved for a topic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatchError {
    #[error("template matching failed: catalog is empty")]
    EmptyCatalog,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^##[ \t]*(?:案例|Case)[ \t]*(\d+)[ \t]*[：:][ \t]*(.+?)[ \t\r]*$").unwrap()
    })
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").unwrap())
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").unwrap())
}

/// Match keywords for a case title, de-duplicated in table order.
pub fn derive_keywords(title: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    KEYWORD_TABLE
        .iter()
        .filter(|(key, _)| title.contains(key))
        .flat_map(|(_, values)| values.iter())
        .filter(|v| seen.insert(**v))
        .map(|v| (*v).to_string())
        .collect()
}

/// The loaded set of templates, in document order.
///
/// Read-only after load and shared by reference across workers.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    /// Read and parse a catalog file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::parse(&content);
        if catalog.is_empty() {
            tracing::warn!("No templates found in {}", path.display());
        } else {
            tracing::info!("Loaded {} templates from {}", catalog.len(), path.display());
        }
        Ok(catalog)
    }

    /// Parse a catalog document. Cases without a fenced prompt block are skipped.
    pub fn parse(content: &str) -> Self {
        let headings: Vec<_> = heading_re().captures_iter(content).collect();
        let mut templates: Vec<Template> = Vec::with_capacity(headings.len());

        for (i, caps) in headings.iter().enumerate() {
            let (Some(whole), Some(number), Some(title)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let body_end = headings
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(content.len(), |m| m.start());
            let body = &content[whole.end()..body_end];

            let Some(prompt) = fence_re()
                .captures(body)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim())
                .filter(|p| !p.is_empty())
            else {
                tracing::debug!("Case {} has no prompt block, skipped", number.as_str());
                continue;
            };

            let case_number = number.as_str().to_string();
            if templates.iter().any(|t| t.case_number == case_number) {
                tracing::warn!("Duplicate case {}, keeping the first", case_number);
                continue;
            }

            let title = title.as_str().trim().to_string();
            templates.push(Template {
                case_number,
                keywords: derive_keywords(&title),
                title,
                prompt: prompt.to_string(),
            });
        }

        Self { templates }
    }

    pub fn from_templates(templates: Vec<Template>) -> Self {
        Self { templates }
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, case_number: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.case_number == case_number)
    }
}

/// Selects and customizes templates for topics.
pub struct TemplateMatcher<'a> {
    catalog: &'a TemplateCatalog,
    provider: Option<&'a dyn LlmProvider>,
    min_custom_chars: usize,
    max_tokens: u32,
}

impl<'a> TemplateMatcher<'a> {
    pub fn new(catalog: &'a TemplateCatalog, provider: &'a dyn LlmProvider) -> Self {
        Self {
            catalog,
            provider: Some(provider),
            min_custom_chars: 50,
            max_tokens: 2000,
        }
    }

    /// A matcher that never calls a model: keyword scoring only, no customization.
    pub fn keyword_only(catalog: &'a TemplateCatalog) -> Self {
        Self {
            catalog,
            provider: None,
            min_custom_chars: 50,
            max_tokens: 2000,
        }
    }

    /// Customized prompts must be longer than this to replace the template's own prompt.
    #[must_use]
    pub fn with_min_custom_chars(mut self, chars: usize) -> Self {
        self.min_custom_chars = chars;
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Model-assisted choice with keyword fallback.
    pub fn find_best_match(&self, topic: &Topic) -> Result<&'a Template, MatchError> {
        if self.catalog.is_empty() {
            return Err(MatchError::EmptyCatalog);
        }

        if let Some(template) = self.ai_match(topic) {
            tracing::info!(
                "Matched '{}' to case {} ({})",
                topic.title,
                template.case_number,
                template.title
            );
            return Ok(template);
        }

        tracing::warn!("Model match failed for '{}', using keyword scoring", topic.title);
        self.keyword_match(topic).ok_or(MatchError::EmptyCatalog)
    }

    /// Ask the model for a case number. `None` on service failure, no number, or an
    /// unknown number.
    pub fn ai_match(&self, topic: &Topic) -> Option<&'a Template> {
        let provider = self.provider?;
        let listing = self
            .catalog
            .templates()
            .iter()
            .map(|t| format!("案例{}: {}", t.case_number, t.title))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "我需要为以下选题找到最适合的图片提示词模板：\n\n\
             选题信息：\n\
             - 标题：{}\n\
             - 核心争议：{}\n\
             - 关键词：{}\n\
             - 内容简介：{}\n\n\
             可选模板列表：\n{}\n\n\
             请分析选题的内容类型、情感色彩和视觉需求，从上述模板中选择最适合的一个。\n\
             只返回案例编号，如：87\n\n请选择：",
            topic.title,
            topic.controversy,
            topic.keywords,
            preview(&topic.summary, 200),
            listing
        );

        let response = match provider.complete(
            &[ChatMessage::user(prompt)],
            MATCH_TEMPERATURE,
            MATCH_MAX_TOKENS,
        ) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Template match call failed for '{}': {}", topic.title, e);
                return None;
            }
        };

        let number = number_re().find(response.text.trim())?;
        let found = self.catalog.get(number.as_str());
        if found.is_none() {
            tracing::debug!("Model picked unknown case {}", number.as_str());
        }
        found
    }

    /// Keyword scoring. Returns `None` only for an empty catalog.
    ///
    /// Each derived keyword found in the topic text scores 1; any title word found scores
    /// a flat 2. Highest score wins, ties go to the earlier template, and an all-zero
    /// catalog yields its first template.
    pub fn keyword_match(&self, topic: &Topic) -> Option<&'a Template> {
        let text = topic.search_text();
        let mut best: Option<(&'a Template, usize)> = None;

        for template in self.catalog.templates() {
            let mut score = template
                .keywords
                .iter()
                .filter(|k| text.contains(&k.to_lowercase()))
                .count();
            let title = template.title.to_lowercase();
            if title.split_whitespace().any(|word| text.contains(word)) {
                score += 2;
            }
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((template, score));
            }
        }

        match best {
            Some((template, _)) => Some(template),
            None => {
                let first = self.catalog.templates().first()?;
                tracing::info!("No keyword overlap, defaulting to case {}", first.case_number);
                Some(first)
            }
        }
    }

    /// Adapt `template`'s prompt to `topic`. Never fails: any problem returns the
    /// template's own prompt.
    pub fn customize(&self, template: &Template, topic: &Topic) -> String {
        let Some(provider) = self.provider else {
            return template.prompt.clone();
        };

        let prompt = format!(
            "请根据以下选题信息，定制这个图片生成提示词：\n\n\
             选题信息：\n\
             - 标题：{}\n\
             - 关键词：{}\n\
             - 核心争议：{}\n\n\
             原始提示词模板：\n{}\n\n\
             请保持原始提示词的基本结构和风格，根据选题内容进行适当的定制，使图片更符合选题主题。\n\
             注意：保持提示词的专业性和可执行性，保持原有的视觉风格。\n\n\
             定制后的提示词：",
            topic.title, topic.keywords, topic.controversy, template.prompt
        );

        match provider.complete(
            &[ChatMessage::user(prompt)],
            CUSTOMIZE_TEMPERATURE,
            self.max_tokens,
        ) {
            Ok(response) => {
                let customized = response.text.trim();
                if customized.chars().count() > self.min_custom_chars {
                    customized.to_string()
                } else {
                    tracing::warn!(
                        "Customized prompt for '{}' too short ({} chars), keeping template",
                        topic.title,
                        customized.chars().count()
                    );
                    template.prompt.clone()
                }
            }
            Err(e) => {
                tracing::warn!("Prompt customization failed for '{}': {}", topic.title, e);
                template.prompt.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{LlmResponse, ProviderError};

    /// Answers every call with the same reply; `None` fails the call.
    struct Scripted(Option<String>);

    impl LlmProvider for Scripted {
        fn complete(
            &self,
            _messages: &[ChatMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<LlmResponse, ProviderError> {
            match &self.0 {
                Some(text) => Ok(LlmResponse {
                    text: text.clone(),
                    ..LlmResponse::default()
                }),
                None => Err(ProviderError::Http("connection refused".into())),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn cover_topic() -> Topic {
        Topic {
            keywords: "小红书、封面".to_string(),
            ..Topic::from_title("新品发布")
        }
    }

    const CATALOG: &str = "# 图片提示词\n\n\
## 案例 1：复古宣传海报\n\n说明文字\n\n```\nRetro poster prompt\n```\n\n\
## 案例 2：无代码块的案例\n\n只有说明\n\n\
## 案例 3：小红书封面\n\n```text\nCover prompt line 1\nline 2\n```\n\n\
## Case 4: Minimal 3D badge\n```\nBadge prompt\n```\n";

    #[test]
    fn test_parse_skips_case_without_block() {
        let catalog = TemplateCatalog::parse(CATALOG);
        let numbers: Vec<_> = catalog
            .templates()
            .iter()
            .map(|t| t.case_number.as_str())
            .collect();
        assert_eq!(numbers, vec!["1", "3", "4"]);
        assert_eq!(catalog.get("3").unwrap().prompt, "Cover prompt line 1\nline 2");
        assert_eq!(catalog.get("4").unwrap().title, "Minimal 3D badge");
    }

    #[test]
    fn test_derived_keywords_dedup_in_table_order() {
        assert_eq!(
            derive_keywords("复古宣传海报"),
            vec!["海报", "宣传", "设计", "复古"]
        );
        assert!(derive_keywords("unrelated").is_empty());
    }

    #[test]
    fn test_empty_document() {
        assert!(TemplateCatalog::parse("no cases here").is_empty());
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(TemplateCatalog::load(&tmp.path().join("nope.md")).is_err());
    }

    #[test]
    fn test_keyword_match_scores_and_defaults() {
        let catalog = TemplateCatalog::parse(CATALOG);
        let matcher = TemplateMatcher::keyword_only(&catalog);

        let cover = Topic {
            keywords: "小红书、封面".to_string(),
            ..Topic::from_title("新品发布")
        };
        assert_eq!(matcher.keyword_match(&cover).unwrap().case_number, "3");

        let nothing = Topic::from_title("zzz");
        assert_eq!(matcher.keyword_match(&nothing).unwrap().case_number, "1");
    }

    #[test]
    fn test_title_word_bonus() {
        let catalog = TemplateCatalog::parse(CATALOG);
        let matcher = TemplateMatcher::keyword_only(&catalog);
        // "badge" is a title word of case 4 and outscores nothing else.
        let topic = Topic::from_title("A shiny BADGE for everyone");
        assert_eq!(matcher.keyword_match(&topic).unwrap().case_number, "4");
    }

    #[test]
    fn test_empty_catalog_never_matches() {
        let catalog = TemplateCatalog::default();
        let matcher = TemplateMatcher::keyword_only(&catalog);
        assert_eq!(
            matcher.find_best_match(&Topic::from_title("x")),
            Err(MatchError::EmptyCatalog)
        );
    }

    #[test]
    fn test_customize_without_provider_keeps_prompt() {
        let catalog = TemplateCatalog::parse(CATALOG);
        let matcher = TemplateMatcher::keyword_only(&catalog);
        let template = catalog.get("1").unwrap();
        assert_eq!(
            matcher.customize(template, &Topic::from_title("t")),
            "Retro poster prompt"
        );
    }

    #[test]
    fn test_model_pick_wins_over_keywords() {
        let catalog = TemplateCatalog::parse(CATALOG);
        let llm = Scripted(Some("我选择案例 4".into()));
        let matcher = TemplateMatcher::new(&catalog, &llm);
        assert_eq!(matcher.find_best_match(&cover_topic()).unwrap().case_number, "4");
    }

    #[test]
    fn test_unusable_model_reply_falls_back_to_keywords() {
        let catalog = TemplateCatalog::parse(CATALOG);
        for reply in [None, Some("都不太合适"), Some("案例 99")] {
            let llm = Scripted(reply.map(String::from));
            let matcher = TemplateMatcher::new(&catalog, &llm);
            assert!(matcher.ai_match(&cover_topic()).is_none(), "reply {:?}", reply);
            assert_eq!(
                matcher.find_best_match(&cover_topic()).unwrap().case_number,
                "3",
                "reply {:?}",
                reply
            );
        }
    }

    #[test]
    fn test_short_customization_keeps_template() {
        let catalog = TemplateCatalog::parse(CATALOG);
        let template = catalog.get("1").unwrap();

        // Exactly 50 chars after trimming is not enough.
        let llm = Scripted(Some(format!("  {}  ", "字".repeat(50))));
        let matcher = TemplateMatcher::new(&catalog, &llm);
        assert_eq!(matcher.customize(template, &cover_topic()), "Retro poster prompt");

        let llm = Scripted(Some(format!("  {}\n", "字".repeat(51))));
        let matcher = TemplateMatcher::new(&catalog, &llm);
        assert_eq!(matcher.customize(template, &cover_topic()), "字".repeat(51));
    }

    #[test]
    fn test_failed_customization_keeps_template() {
        let catalog = TemplateCatalog::parse(CATALOG);
        let llm = Scripted(None);
        let matcher = TemplateMatcher::new(&catalog, &llm);
        let template = catalog.get("3").unwrap();
        assert_eq!(
            matcher.customize(template, &cover_topic()),
            "Cover prompt line 1\nline 2"
        );
    }
}
