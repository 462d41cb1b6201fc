//! Topics, the unit of work submitted to the pipeline, and the sources they are read from.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Delimiters accepted between keywords in [`Topic::keywords`].
const KEYWORD_DELIMITERS: &[char] = &['、', ',', '，', ';', '；'];

/// Errors from reading or validating topics.
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("invalid content level {0} (expected 1=Confirmed, 2=Likely, 3=Rumor)")]
    InvalidLevel(u8),
    #[error("failed to read topics from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse topics from {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("topic #{index} has an empty title")]
    EmptyTitle { index: usize },
}

/// How well-sourced a topic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ContentLevel {
    /// Official documents, or reported by several mainstream outlets.
    Confirmed = 1,
    /// First reported by a wire service or a leading journalist, not denied.
    Likely = 2,
    /// Social-media leak only, pending follow-up.
    #[default]
    Rumor = 3,
}

impl ContentLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Confirmed => "Confirmed",
            Self::Likely => "Likely",
            Self::Rumor => "Rumor",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Confirmed => "Confirmed: official documents or multiple mainstream outlets",
            Self::Likely => "Likely: first reported by a wire service or lead journalist, not denied",
            Self::Rumor => "Rumor: social-media leak only, pending follow-up",
        }
    }
}

impl TryFrom<u8> for ContentLevel {
    type Error = TopicError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Confirmed),
            2 => Ok(Self::Likely),
            3 => Ok(Self::Rumor),
            other => Err(TopicError::InvalidLevel(other)),
        }
    }
}

impl From<ContentLevel> for u8 {
    fn from(level: ContentLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for ContentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// A subject to generate a thread and a cover image about.
///
/// `title` is the join key between the content and image result streams, with `id`
/// as a tiebreaker when two topics share a title.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Topic {
    pub title: String,
    /// Keywords separated by `、`, `,`, `，`, `;` or `；`.
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub summary: String,
    /// Core controversy of the topic. Also accepted as `description`.
    #[serde(default, alias = "description")]
    pub controversy: String,
    #[serde(default)]
    pub conclusion: String,
    #[serde(default)]
    pub level: ContentLevel,
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,
}

impl Topic {
    /// A topic with only a title; every other field takes its default.
    pub fn from_title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Keywords split on the accepted delimiters, trimmed, empties dropped.
    pub fn keyword_list(&self) -> Vec<&str> {
        self.keywords
            .split(KEYWORD_DELIMITERS)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect()
    }

    /// Lowercased `title keywords summary`, the text heuristics match against.
    pub fn search_text(&self) -> String {
        format!("{} {} {}", self.title, self.keywords, self.summary).to_lowercase()
    }
}

/// Accept ids written as JSON strings or numbers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Load an ordered topic list from disk.
///
/// `.json` files hold an array of topic objects; anything else is read as one title per
/// non-empty line. Iteration order is file order.
pub fn load_topics(path: &Path) -> Result<Vec<Topic>, TopicError> {
    let content = std::fs::read_to_string(path).map_err(|source| TopicError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        parse_topics_json(&content).map_err(|source| match source {
            TopicParseError::Json(source) => TopicError::Json {
                path: path.to_path_buf(),
                source,
            },
            TopicParseError::Topic(e) => e,
        })
    } else {
        Ok(parse_topics_lines(&content))
    }
}

enum TopicParseError {
    Json(serde_json::Error),
    Topic(TopicError),
}

fn parse_topics_json(content: &str) -> Result<Vec<Topic>, TopicParseError> {
    let topics: Vec<Topic> = serde_json::from_str(content).map_err(TopicParseError::Json)?;
    if let Some(index) = topics.iter().position(|t| t.title.trim().is_empty()) {
        return Err(TopicParseError::Topic(TopicError::EmptyTitle { index }));
    }
    Ok(topics)
}

/// One topic per non-empty trimmed line.
pub fn parse_topics_lines(content: &str) -> Vec<Topic> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(Topic::from_title)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_defaults_to_rumor() {
        let topic: Topic = serde_json::from_str(r#"{"title": "t"}"#).unwrap();
        assert_eq!(topic.level, ContentLevel::Rumor);
        assert_eq!(topic.level.as_u8(), 3);
    }

    #[test]
    fn test_level_rejects_unknown_value() {
        let err = serde_json::from_str::<Topic>(r#"{"title": "t", "level": 7}"#).unwrap_err();
        assert!(err.to_string().contains("invalid content level 7"));
    }

    #[test]
    fn test_description_alias_and_numeric_id() {
        let topic: Topic = serde_json::from_str(
            r#"{"title": "t", "description": "why it matters", "id": 42, "level": 1}"#,
        )
        .unwrap();
        assert_eq!(topic.controversy, "why it matters");
        assert_eq!(topic.id.as_deref(), Some("42"));
        assert_eq!(topic.level, ContentLevel::Confirmed);
    }

    #[test]
    fn test_keyword_list_mixed_delimiters() {
        let topic = Topic {
            keywords: "AI、编程, Rust，工具;  ".to_string(),
            ..Topic::from_title("x")
        };
        assert_eq!(topic.keyword_list(), vec!["AI", "编程", "Rust", "工具"]);
    }

    #[test]
    fn test_keyword_list_empty() {
        assert!(Topic::from_title("x").keyword_list().is_empty());
    }

    #[test]
    fn test_search_text_lowercases() {
        let topic = Topic {
            keywords: "GPT".to_string(),
            summary: "Launch".to_string(),
            ..Topic::from_title("New Model")
        };
        assert_eq!(topic.search_text(), "new model gpt launch");
    }

    #[test]
    fn test_parse_lines_skips_blanks() {
        let topics = parse_topics_lines("  first \n\n\nsecond\n   \n");
        assert_eq!(topics.len(), 2);
        assert_eq!(topics[0].title, "first");
        assert_eq!(topics[1].title, "second");
    }

    #[test]
    fn test_json_rejects_empty_title() {
        let result = parse_topics_json(r#"[{"title": "ok"}, {"title": "  "}]"#);
        assert!(matches!(
            result,
            Err(TopicParseError::Topic(TopicError::EmptyTitle { index: 1 }))
        ));
    }
}
