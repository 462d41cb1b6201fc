//! Per-topic results of each pipeline stage, the merged row, and the aggregate report.
//!
//! Every stage returns a tagged success/failure record rather than an error, so one
//! topic's failure never hides another topic's outcome.

use crate::template::Template;
use crate::thread::Thread;
use crate::topic::Topic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Outcome of rewriting one topic into a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentResult {
    pub topic: Topic,
    pub thread: Option<Thread>,
    pub thread_file: Option<PathBuf>,
    pub success: bool,
    pub error: String,
}

impl ContentResult {
    pub fn succeeded(topic: Topic, thread: Thread, thread_file: Option<PathBuf>) -> Self {
        Self {
            topic,
            thread: Some(thread),
            thread_file,
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(topic: Topic, error: impl Into<String>) -> Self {
        Self {
            topic,
            thread: None,
            thread_file: None,
            success: false,
            error: error.into(),
        }
    }
}

/// Outcome of template matching plus prompt customization for one topic.
///
/// `success` is false whenever matching failed or customization failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResult {
    pub topic: Topic,
    pub template: Option<Template>,
    pub prompt: Option<String>,
    pub success: bool,
    pub error: String,
}

impl PromptResult {
    pub fn succeeded(topic: Topic, template: Template, prompt: String) -> Self {
        Self {
            topic,
            template: Some(template),
            prompt: Some(prompt),
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(topic: Topic, template: Option<Template>, error: impl Into<String>) -> Self {
        Self {
            topic,
            template,
            prompt: None,
            success: false,
            error: error.into(),
        }
    }
}

/// Outcome of calling the image service for one topic.
///
/// Zero downloaded images is a failure even when the upstream call succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResult {
    pub topic: Topic,
    pub prompt: String,
    pub image_paths: Vec<PathBuf>,
    pub success: bool,
    pub error: String,
}

impl ImageResult {
    pub fn succeeded(topic: Topic, prompt: String, image_paths: Vec<PathBuf>) -> Self {
        Self {
            topic,
            prompt,
            image_paths,
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(topic: Topic, prompt: String, error: impl Into<String>) -> Self {
        Self {
            topic,
            prompt,
            image_paths: Vec::new(),
            success: false,
            error: error.into(),
        }
    }
}

/// What happened when a merged row was handed to a publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub published: bool,
    /// Posts that went out, including a partial prefix before a failure.
    pub posted: usize,
    pub location: Option<String>,
    pub error: String,
}

/// Terminal state of one topic in the aggregate report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicState {
    Success,
    /// Exactly one of content and image succeeded.
    Partial,
    Failed,
}

/// The join of one topic's content result and image result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    pub topic: Topic,
    pub thread: Option<Thread>,
    pub thread_file: Option<PathBuf>,
    pub content_success: bool,
    pub content_error: String,
    pub images: Vec<PathBuf>,
    pub image_prompt: Option<String>,
    pub image_success: bool,
    pub image_error: String,
    pub publish: Option<PublishOutcome>,
}

/// Error recorded when the image stream produced no entry for a topic.
pub const MISSING_IMAGE_RESULT: &str =
    "no image result (template matching or prompt generation failed)";

impl MergedResult {
    /// Join a content result with its image result; a missing image side counts as failed.
    pub fn merge(content: ContentResult, image: Option<ImageResult>) -> Self {
        match image {
            Some(img) => Self::join(
                content,
                img.image_paths,
                Some(img.prompt),
                img.success,
                img.error,
            ),
            None => Self::without_image(content, MISSING_IMAGE_RESULT),
        }
    }

    /// A row whose image side never ran, failed with `reason`.
    pub fn without_image(content: ContentResult, reason: &str) -> Self {
        Self::join(content, Vec::new(), None, false, reason.to_string())
    }

    fn join(
        content: ContentResult,
        images: Vec<PathBuf>,
        image_prompt: Option<String>,
        image_success: bool,
        image_error: String,
    ) -> Self {
        Self {
            topic: content.topic,
            thread: content.thread,
            thread_file: content.thread_file,
            content_success: content.success,
            content_error: content.error,
            images,
            image_prompt,
            image_success,
            image_error,
            publish: None,
        }
    }

    pub fn overall_success(&self) -> bool {
        self.content_success && self.image_success
    }

    pub fn state(&self) -> TopicState {
        match (self.content_success, self.image_success) {
            (true, true) => TopicState::Success,
            (false, false) => TopicState::Failed,
            _ => TopicState::Partial,
        }
    }

    /// Human-readable reason for the terminal state.
    pub fn reason(&self) -> String {
        let mut parts = Vec::new();
        if !self.content_success {
            parts.push(format!("content: {}", self.content_error));
        }
        if !self.image_success {
            parts.push(format!("image: {}", self.image_error));
        }
        if parts.is_empty() {
            "ok".to_string()
        } else {
            parts.join("; ")
        }
    }
}

/// Aggregate counts over a batch, derived purely from the merged rows.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_topics: usize,
    pub content_success_count: usize,
    pub image_success_count: usize,
    pub overall_success_count: usize,
    pub partial_count: usize,
    pub total_images_generated: usize,
    pub published_count: usize,
    /// Overall successes as a percentage of all topics; 0 for an empty batch.
    pub success_rate: f64,
}

impl BatchSummary {
    pub fn from_results(results: &[MergedResult]) -> Self {
        let total = results.len();
        let overall = results.iter().filter(|r| r.overall_success()).count();
        Self {
            total_topics: total,
            content_success_count: results.iter().filter(|r| r.content_success).count(),
            image_success_count: results.iter().filter(|r| r.image_success).count(),
            overall_success_count: overall,
            partial_count: results
                .iter()
                .filter(|r| r.state() == TopicState::Partial)
                .count(),
            total_images_generated: results.iter().map(|r| r.images.len()).sum(),
            published_count: results
                .iter()
                .filter(|r| r.publish.as_ref().is_some_and(|p| p.published))
                .count(),
            success_rate: if total == 0 {
                0.0
            } else {
                overall as f64 / total as f64 * 100.0
            },
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Batch summary:")?;
        writeln!(f, "  Topics: {}", self.total_topics)?;
        writeln!(
            f,
            "  Content rewritten: {}/{}",
            self.content_success_count, self.total_topics
        )?;
        writeln!(
            f,
            "  Images generated: {}/{} ({} files)",
            self.image_success_count, self.total_topics, self.total_images_generated
        )?;
        writeln!(
            f,
            "  Overall success: {}/{} ({} partial)",
            self.overall_success_count, self.total_topics, self.partial_count
        )?;
        if self.published_count > 0 {
            writeln!(f, "  Published: {}", self.published_count)?;
        }
        write!(f, "  Success rate: {:.1}%", self.success_rate)
    }
}

/// One row of the persisted batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRow {
    pub topic_title: String,
    pub topic_id: Option<String>,
    pub state: TopicState,
    pub reason: String,
    pub thread_file: Option<PathBuf>,
    pub thread_count: usize,
    pub content_success: bool,
    pub content_error: String,
    pub image_count: usize,
    pub image_paths: Vec<PathBuf>,
    pub image_prompt_length: usize,
    pub image_success: bool,
    pub image_error: String,
    pub overall_success: bool,
    pub publish: Option<PublishOutcome>,
}

impl From<&MergedResult> for ReportRow {
    fn from(r: &MergedResult) -> Self {
        Self {
            topic_title: r.topic.title.clone(),
            topic_id: r.topic.id.clone(),
            state: r.state(),
            reason: r.reason(),
            thread_file: r.thread_file.clone(),
            thread_count: r.thread.as_ref().map_or(0, Thread::len),
            content_success: r.content_success,
            content_error: r.content_error.clone(),
            image_count: r.images.len(),
            image_paths: r.images.clone(),
            image_prompt_length: r.image_prompt.as_ref().map_or(0, |p| p.chars().count()),
            image_success: r.image_success,
            image_error: r.image_error.clone(),
            overall_success: r.overall_success(),
            publish: r.publish.clone(),
        }
    }
}

/// The aggregate document written once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub timestamp: String,
    pub language_mode: String,
    #[serde(flatten)]
    pub summary: BatchSummary,
    pub results: Vec<ReportRow>,
}

impl BatchReport {
    pub fn new(timestamp: String, language_mode: &str, results: &[MergedResult]) -> Self {
        Self {
            timestamp,
            language_mode: language_mode.to_string(),
            summary: BatchSummary::from_results(results),
            results: results.iter().map(ReportRow::from).collect(),
        }
    }
}
