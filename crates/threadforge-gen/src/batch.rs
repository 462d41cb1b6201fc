//! Two-phase prompt generation and concurrent image generation over a topic batch.
//!
//! Phase 1 matches templates sequentially in input order. Phase 2 customizes and composes
//! prompts on a bounded pool. Phase 3 calls the image service on a second bounded pool,
//! behind a shared rate gate. Every phase yields one record per topic; failures are
//! records, never errors.

use crate::image::ImageProvider;
use crate::matcher::TemplateMatcher;
use crate::pool::{PoolError, WorkerPool};
use crate::progress::PipelineProgress;
use crate::prompt::PromptGenerator;
use crate::rate::RateGate;
use serde::Serialize;
use std::path::PathBuf;
use threadforge_core::storage::{ArtifactStore, sanitize_title, timestamp};
use threadforge_core::{ImageResult, PromptResult, Template, Topic};

/// Sub-directory of the output root that holds downloaded images.
pub const IMAGE_DIR: &str = "images";

/// Knobs for a batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_workers: usize,
    /// Run customized prompts through the cover-copy composer.
    pub compose_prompts: bool,
    /// Write `batch_prompts_*.json` and `detailed_prompts_*.md`.
    pub save_prompts: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 3,
            compose_prompts: true,
            save_prompts: false,
        }
    }
}

/// Files written by a prompt report.
#[derive(Debug, Clone)]
pub struct PromptReportFiles {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

#[derive(Serialize)]
struct PromptReport<'a> {
    timestamp: String,
    total_topics: usize,
    success_count: usize,
    failed_count: usize,
    results: Vec<PromptReportRow<'a>>,
}

#[derive(Serialize)]
struct PromptReportRow<'a> {
    title: &'a str,
    id: Option<&'a str>,
    template_case: Option<&'a str>,
    template_title: Option<&'a str>,
    prompt: Option<&'a str>,
    success: bool,
    error: &'a str,
}

/// Runs template matching, prompt composition and image generation across topics.
pub struct BatchPromptGenerator<'a> {
    matcher: TemplateMatcher<'a>,
    generator: Option<PromptGenerator<'a>>,
    images: Option<&'a dyn ImageProvider>,
    gate: RateGate,
    store: ArtifactStore,
    options: BatchOptions,
    progress: PipelineProgress,
}

impl<'a> BatchPromptGenerator<'a> {
    pub fn new(matcher: TemplateMatcher<'a>, store: ArtifactStore, options: BatchOptions) -> Self {
        Self {
            matcher,
            generator: None,
            images: None,
            gate: RateGate::disabled(),
            store,
            options,
            progress: PipelineProgress::hidden(),
        }
    }

    /// Composer used when `compose_prompts` is on.
    #[must_use]
    pub fn with_generator(mut self, generator: PromptGenerator<'a>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Image service for phase 3, behind `gate`.
    #[must_use]
    pub fn with_images(mut self, images: &'a dyn ImageProvider, gate: RateGate) -> Self {
        self.images = Some(images);
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: PipelineProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Phases 1 and 2: one PromptResult per topic, in completion order with failed
    /// matches appended last.
    pub fn run(&self, topics: &[Topic]) -> Result<Vec<PromptResult>, PoolError> {
        tracing::info!("Matching templates for {} topics", topics.len());

        let mut matched: Vec<(Topic, Template)> = Vec::with_capacity(topics.len());
        let mut unmatched: Vec<PromptResult> = Vec::new();
        for topic in topics {
            match self.matcher.find_best_match(topic) {
                Ok(template) => matched.push((topic.clone(), template.clone())),
                Err(e) => {
                    tracing::warn!("No template for '{}': {}", topic.title, e);
                    unmatched.push(PromptResult::failed(topic.clone(), None, e.to_string()));
                }
            }
        }

        let mut results = if matched.is_empty() {
            Vec::new()
        } else {
            let pool = WorkerPool::new("prompt", self.options.max_workers)?;
            let phase = self.progress.start_phase("Prompts", matched.len() as u64);
            let results = pool.run(
                matched,
                |(topic, template)| self.build_prompt(topic, template),
                |(topic, template), msg| {
                    PromptResult::failed(topic.clone(), Some(template.clone()), msg)
                },
                |_| phase.tick(),
            );
            phase.finish();
            results
        };
        results.extend(unmatched);

        let ok = results.iter().filter(|r| r.success).count();
        tracing::info!("Prompt generation: {}/{} succeeded", ok, results.len());

        if self.options.save_prompts {
            match self.save_prompt_report(&results) {
                Ok(files) => tracing::info!(
                    "Saved prompt reports to {} and {}",
                    files.json.display(),
                    files.markdown.display()
                ),
                Err(e) => tracing::warn!("Failed to save prompt reports: {}", e),
            }
        }

        Ok(results)
    }

    /// Customize the template for the topic, then compose the final prompt.
    fn build_prompt(&self, topic: &Topic, template: &Template) -> PromptResult {
        let customized = self.matcher.customize(template, topic);

        let generator = match (&self.generator, self.options.compose_prompts) {
            (Some(generator), true) => generator,
            _ => return PromptResult::succeeded(topic.clone(), template.clone(), customized),
        };

        match generator.generate_with_style(topic, &customized) {
            Ok(prompt) => PromptResult::succeeded(topic.clone(), template.clone(), prompt),
            Err(e) => {
                tracing::warn!("Prompt composition failed for '{}': {}", topic.title, e);
                PromptResult::failed(
                    topic.clone(),
                    Some(template.clone()),
                    format!("prompt generation failed: {}", e),
                )
            }
        }
    }

    /// Phase 3: one ImageResult per successful PromptResult, in completion order.
    pub fn run_images(&self, prompts: &[PromptResult]) -> Result<Vec<ImageResult>, PoolError> {
        let jobs: Vec<(Topic, String)> = prompts
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.prompt.clone().map(|p| (r.topic.clone(), p)))
            .collect();
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        tracing::info!("Generating images for {} topics", jobs.len());

        let pool = WorkerPool::new("image", self.options.max_workers)?;
        let phase = self.progress.start_phase("Images", jobs.len() as u64);
        let results = pool.run(
            jobs,
            |(topic, prompt)| self.generate_image(topic, prompt),
            |(topic, prompt), msg| ImageResult::failed(topic.clone(), prompt.clone(), msg),
            |_| phase.tick(),
        );
        phase.finish();

        let ok = results.iter().filter(|r| r.success).count();
        tracing::info!("Image generation: {}/{} succeeded", ok, results.len());
        Ok(results)
    }

    /// Generate and download at most one image for a topic.
    fn generate_image(&self, topic: &Topic, prompt: &str) -> ImageResult {
        let Some(images) = self.images else {
            return ImageResult::failed(
                topic.clone(),
                prompt.to_string(),
                "image generation is disabled",
            );
        };

        self.gate.wait();
        let artifacts = match images.generate(prompt) {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::warn!("Image request failed for '{}': {}", topic.title, e);
                return ImageResult::failed(topic.clone(), prompt.to_string(), e.to_string());
            }
        };
        if artifacts.is_empty() {
            tracing::warn!("No image links returned for '{}'", topic.title);
            return ImageResult::failed(
                topic.clone(),
                prompt.to_string(),
                "image service returned no downloadable images",
            );
        }

        let name = format!("{}_{}", timestamp(), sanitize_title(&topic.title, 30));
        let mut last_error = String::new();
        for artifact in &artifacts {
            let saved = images
                .download(artifact)
                .map_err(|e| e.to_string())
                .and_then(|bytes| {
                    self.store
                        .write_bytes_in(IMAGE_DIR, &name, &artifact.extension, &bytes)
                        .map_err(|e| e.to_string())
                });
            match saved {
                Ok(path) => {
                    tracing::info!("Saved image for '{}' to {}", topic.title, path.display());
                    return ImageResult::succeeded(topic.clone(), prompt.to_string(), vec![path]);
                }
                Err(e) => {
                    tracing::warn!("Download of {} failed: {}", artifact.url, e);
                    last_error = e;
                }
            }
        }

        ImageResult::failed(
            topic.clone(),
            prompt.to_string(),
            format!(
                "all {} image download(s) failed: {}",
                artifacts.len(),
                last_error
            ),
        )
    }

    /// Write the JSON and markdown prompt reports.
    pub fn save_prompt_report(
        &self,
        results: &[PromptResult],
    ) -> Result<PromptReportFiles, threadforge_core::StoreError> {
        let success_count = results.iter().filter(|r| r.success).count();
        let report = PromptReport {
            timestamp: timestamp(),
            total_topics: results.len(),
            success_count,
            failed_count: results.len() - success_count,
            results: results
                .iter()
                .map(|r| PromptReportRow {
                    title: &r.topic.title,
                    id: r.topic.id.as_deref(),
                    template_case: r.template.as_ref().map(|t| t.case_number.as_str()),
                    template_title: r.template.as_ref().map(|t| t.title.as_str()),
                    prompt: r.prompt.as_deref(),
                    success: r.success,
                    error: &r.error,
                })
                .collect(),
        };

        let json = self.store.write_json("batch_prompts", None, &report)?;
        let markdown = render_prompt_markdown(results);
        let markdown = self
            .store
            .write_text("detailed_prompts", None, "md", &markdown)?;
        Ok(PromptReportFiles { json, markdown })
    }
}

/// Per-topic markdown report of matched templates and prompts.
pub fn render_prompt_markdown(results: &[PromptResult]) -> String {
    let ok = results.iter().filter(|r| r.success).count();
    let mut out = String::new();
    out.push_str("# Image prompt report\n\n");
    out.push_str(&format!("- Generated: {}\n", timestamp()));
    out.push_str(&format!("- Topics: {}\n", results.len()));
    out.push_str(&format!("- Succeeded: {}\n", ok));
    out.push_str(&format!("- Failed: {}\n\n", results.len() - ok));

    for (i, r) in results.iter().enumerate() {
        out.push_str(&format!("## {}. {}\n\n", i + 1, r.topic.title));
        out.push_str(&format!("- Keywords: {}\n", r.topic.keywords));
        out.push_str(&format!("- Level: {}\n", r.topic.level.description()));
        if !r.topic.summary.is_empty() {
            out.push_str(&format!("- Summary: {}\n", r.topic.summary));
        }
        out.push('\n');

        if let Some(template) = &r.template {
            out.push_str(&format!(
                "### Template: case {} ({})\n\n```\n{}\n```\n\n",
                template.case_number, template.title, template.prompt
            ));
        }

        match (&r.prompt, r.success) {
            (Some(prompt), true) => {
                out.push_str(&format!("### Final prompt\n\n```\n{}\n```\n\n", prompt));
            }
            _ => {
                out.push_str(&format!("### Failed\n\n{}\n\n", r.error));
            }
        }
    }
    out
}
