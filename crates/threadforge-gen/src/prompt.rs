//! Final image-prompt composition: topic category, cover copy, one model call.

use crate::extract::{extract_object, preview};
use crate::provider::{ChatMessage, LlmProvider, ProviderError};
use std::fmt;
use threadforge_core::Topic;

/// Titles longer than this (in chars) are abbreviated on the cover.
pub const TITLE_MAX_CHARS: usize = 15;
/// Chars kept when a long title has no keyword to abbreviate with.
const TITLE_CUT_CHARS: usize = 12;

const PROMPT_TEMPERATURE: f32 = 0.7;

/// Markers that open a prompt-looking block in free-form replies.
const FALLBACK_MARKERS: &[&str] = &["画图：", "要求："];

const SYSTEM_PROMPT: &str = "你是一个专业的图片提示词生成专家。你的任务是根据用户提供的选题信息，\
生成一个完整的、可直接用于图片生成的提示词。\n\n\
请严格按照以下JSON格式输出：\n\
```json\n{\n  \"image_prompt\": \"完整的图片生成提示词内容...\"\n}\n```";

/// Base visual style when no template prompt is supplied.
pub const BASE_STYLE: &str = "画图：画一个小红书封面。
要求：
- 有足够的吸引力吸引用户点击
- 字体醒目，选择有个性的字体
- 文字大小按重要度分级，体现文案的逻辑结构
- 标题是普通文字的至少2倍
- 文字段落之间留白
- 只对要强调的文字用醒目色吸引用户注意
- 背景使用时尚图案（例如：纸张纹理、记事本页面、简约几何图形等）
- 使用通用图标或装饰性小插画增加视觉层次
- 画面比例 9:16

实际文案内容：";

/// Content category of a topic, in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    AiTech,
    CodeDev,
    Business,
    ProductLaunch,
    General,
}

impl TopicCategory {
    /// Categories checked by [`classify`], first match wins.
    const PRIORITY: [Self; 4] = [Self::AiTech, Self::CodeDev, Self::Business, Self::ProductLaunch];

    pub fn label(self) -> &'static str {
        match self {
            Self::AiTech => "AI科技",
            Self::CodeDev => "代码开发",
            Self::Business => "商业财经",
            Self::ProductLaunch => "产品发布",
            Self::General => "通用话题",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::AiTech => &["ai", "gpt", "claude", "人工智能", "机器学习", "深度学习"],
            Self::CodeDev => &["代码", "编程", "python", "javascript", "github", "开发"],
            Self::Business => &["商业", "财经", "投资", "股票", "金融", "市场"],
            Self::ProductLaunch => &["发布", "上线", "推出", "更新", "版本", "产品"],
            Self::General => &[],
        }
    }

    fn points(self) -> [&'static str; 3] {
        match self {
            Self::AiTech => ["AI能力暴增 🤖", "性能大幅提升 ⚡", "应用场景更广 🎯"],
            Self::CodeDev => ["开发效率翻倍 💻", "新功能超强 🚀", "代码质量提升 ⚡"],
            Self::Business => ["市场影响巨大 📈", "投资价值凸显 💰", "商机不容错过 🎯"],
            Self::ProductLaunch => ["全新功能上线 ✨", "用户体验升级 🔥", "颜值性能双提升 💫"],
            Self::General => ["重磅消息来袭 ✨", "影响力巨大 💪", "值得深度关注 🎨"],
        }
    }

    fn call_to_action(self) -> &'static str {
        match self {
            Self::AiTech => "赶紧了解一下！",
            Self::CodeDev => "程序员必看！",
            Self::Business => "抓住机会！",
            Self::ProductLaunch => "快来体验！",
            Self::General => "值得关注！",
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Classify by substring match over the lowercased topic text.
pub fn classify(topic: &Topic) -> TopicCategory {
    let text = topic.search_text();
    TopicCategory::PRIORITY
        .into_iter()
        .find(|category| category.keywords().iter().any(|k| text.contains(k)))
        .unwrap_or(TopicCategory::General)
}

/// Cover headline for a topic; never empty for a non-empty title.
///
/// Titles over [`TITLE_MAX_CHARS`] become `<first keyword>大升级！`, or the first 12 chars
/// plus `...` when there are no keywords.
pub fn main_title(topic: &Topic) -> String {
    let title = topic.title.trim();
    if title.chars().count() <= TITLE_MAX_CHARS {
        return title.to_string();
    }
    match topic.keyword_list().first() {
        Some(keyword) => format!("{}大升级！", keyword),
        None => {
            let cut: String = title.chars().take(TITLE_CUT_CHARS).collect();
            format!("{}...", cut)
        }
    }
}

/// Filler copy laid out on the cover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverCopy {
    pub category: TopicCategory,
    pub main_title: String,
    pub points: [String; 3],
    pub call_to_action: String,
}

impl CoverCopy {
    pub fn for_topic(topic: &Topic) -> Self {
        let category = classify(topic);
        let mut points = category.points().map(str::to_string);

        let summary = &topic.summary;
        if summary.contains("效率") || summary.contains("提升") {
            points[1] = "效率大幅提升 ⚡".to_string();
        }
        if summary.contains("功能") || summary.contains("特性") {
            points[0] = "新功能震撼 🚀".to_string();
        }
        if summary.contains("性能") || summary.contains("速度") {
            points[2] = "性能表现惊艳 💫".to_string();
        }

        Self {
            category,
            main_title: main_title(topic),
            points,
            call_to_action: category.call_to_action().to_string(),
        }
    }
}

/// Errors from composing an image prompt.
#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("prompt service error: {0}")]
    Service(#[from] ProviderError),
    #[error("no image prompt found in model reply")]
    Unparseable,
}

/// Pull the final prompt out of a reply: the `image_prompt` field of the outermost
/// object, or else the lines following a visual marker.
pub fn parse_prompt_reply(text: &str) -> Option<String> {
    let from_json = extract_object(text).ok().and_then(|obj| {
        obj.get("image_prompt")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
    });
    from_json.or_else(|| fallback_prompt(text))
}

fn fallback_prompt(text: &str) -> Option<String> {
    let mut lines = Vec::new();
    let mut in_prompt = false;
    for line in text.lines().map(str::trim) {
        if FALLBACK_MARKERS.iter().any(|m| line.contains(m)) {
            in_prompt = true;
            lines.push(line);
        } else if in_prompt && !line.is_empty() {
            lines.push(line);
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Turns a topic and a visual style into the prompt sent to the image service.
pub struct PromptGenerator<'a> {
    provider: &'a dyn LlmProvider,
    max_tokens: u32,
}

impl<'a> PromptGenerator<'a> {
    pub fn new(provider: &'a dyn LlmProvider) -> Self {
        Self {
            provider,
            max_tokens: 2000,
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Compose against the built-in base style.
    pub fn generate(&self, topic: &Topic) -> Result<String, PromptError> {
        self.generate_with_style(topic, BASE_STYLE)
    }

    /// Compose using `style` as the visual template.
    pub fn generate_with_style(&self, topic: &Topic, style: &str) -> Result<String, PromptError> {
        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(build_user_prompt(topic, style)),
        ];
        let response = self
            .provider
            .complete(&messages, PROMPT_TEMPERATURE, self.max_tokens)?;
        tracing::debug!(
            "Prompt reply for '{}': {}",
            topic.title,
            preview(&response.text, 200)
        );

        parse_prompt_reply(&response.text).ok_or(PromptError::Unparseable)
    }
}

/// User prompt embedding the cover copy into `style`.
pub fn build_user_prompt(topic: &Topic, style: &str) -> String {
    let copy = CoverCopy::for_topic(topic);
    format!(
        "请为以下选题生成一个完整的图片提示词：

选题信息：
- 标题：{title}
- 关键词：{keywords}
- 摘要：{summary}
- 话题类型：{category}

请基于以下模板生成完整的图片提示词：

{style}

1. **主标题（字号最大，醒目色）**
   {main}

2. **二级要点（字号次大，用同色系高饱和度）**
   - {p0}
   - {p1}
   - {p2}

3. **行动号召（常规字号，留白明显）**
   {cta}

请将上述模板和具体文案合并，生成一个完整的、可直接用于图片生成的提示词。确保文案清晰可读，排版美观。",
        title = topic.title,
        keywords = topic.keywords,
        summary = topic.summary,
        category = copy.category,
        style = style,
        main = copy.main_title,
        p0 = copy.points[0],
        p1 = copy.points[1],
        p2 = copy.points[2],
        cta = copy.call_to_action,
    )
}
