//! Top-level orchestration: content and image streams side by side, merged per topic.

use crate::batch::{BatchOptions, BatchPromptGenerator};
use crate::image::ImageProvider;
use crate::matcher::{TemplateCatalog, TemplateMatcher};
use crate::pool::{PoolError, WorkerPool};
use crate::progress::PipelineProgress;
use crate::prompt::PromptGenerator;
use crate::provider::LlmProvider;
use crate::publish::Publisher;
use crate::rate::RateGate;
use crate::rewrite::{RewritePipeline, RewriteVariant, load_template};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use threadforge_core::config::{ForgeConfig, PathsConfig};
use threadforge_core::storage::{ArtifactStore, timestamp};
use threadforge_core::results::MISSING_IMAGE_RESULT;
use threadforge_core::{
    BatchReport, BatchSummary, ContentResult, ImageResult, MergedResult, PublishOutcome, Topic,
};

/// Image-side reason for rows of a text-only run.
pub const TEXT_ONLY_REASON: &str = "image generation skipped (text-only run)";
/// Image-side reason when image generation is switched off in configuration.
pub const IMAGES_DISABLED_REASON: &str = "image generation is disabled in configuration";

/// The external services a run talks to.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub llm: &'a dyn LlmProvider,
    /// `None` disables image generation.
    pub images: Option<&'a dyn ImageProvider>,
    pub catalog: &'a TemplateCatalog,
    /// `None` disables publishing.
    pub publisher: Option<&'a dyn Publisher>,
}

/// Per-run switches.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    pub variant: RewriteVariant,
    /// Skip template matching and image generation entirely.
    pub text_only: bool,
    pub save_prompts: bool,
    /// Publish rows whose content and image both succeeded.
    pub publish: bool,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    /// One row per input topic, in input order.
    pub results: Vec<MergedResult>,
    pub summary: BatchSummary,
    pub report_file: Option<PathBuf>,
}

/// Runs the whole pipeline over a topic batch.
pub struct ConcurrentProcessor<'a> {
    collaborators: Collaborators<'a>,
    config: ForgeConfig,
    project_root: PathBuf,
    store: ArtifactStore,
    progress: PipelineProgress,
}

impl<'a> ConcurrentProcessor<'a> {
    pub fn new(collaborators: Collaborators<'a>, config: ForgeConfig, project_root: &Path) -> Self {
        let output = PathsConfig::resolve(project_root, &config.paths.output_dir);
        Self {
            collaborators,
            config,
            project_root: project_root.to_path_buf(),
            store: ArtifactStore::new(output),
            progress: PipelineProgress::hidden(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: PipelineProgress) -> Self {
        self.progress = progress;
        self
    }

    /// Process every topic; returns exactly one merged row per input topic.
    pub fn process_topics(
        &self,
        topics: &[Topic],
        options: &ProcessOptions,
    ) -> Result<BatchOutcome, PoolError> {
        if self.config.pipeline.max_workers == 0 {
            return Err(PoolError::ZeroWorkers);
        }
        let run_images = !options.text_only && self.config.image.enabled;
        tracing::info!(
            "Processing {} topics ({}, images {})",
            topics.len(),
            options.variant.label(),
            if run_images { "on" } else { "off" }
        );

        let (contents, images) = std::thread::scope(|s| {
            let image_stream = run_images.then(|| {
                std::thread::Builder::new()
                    .name("image-stream".to_string())
                    .spawn_scoped(s, || self.image_stream(topics, options))
            });

            let contents = self.content_stream(topics, options.variant);

            let images: Result<Vec<ImageResult>, String> = match image_stream {
                None if options.text_only => Err(TEXT_ONLY_REASON.to_string()),
                None => Err(IMAGES_DISABLED_REASON.to_string()),
                Some(Err(e)) => Err(format!("image stream could not start: {}", e)),
                Some(Ok(handle)) => match handle.join() {
                    Ok(Ok(images)) => Ok(images),
                    Ok(Err(e)) => Err(format!("image stream failed: {}", e)),
                    Err(_) => Err("image stream panicked".to_string()),
                },
            };
            (contents, images)
        });

        let contents = contents?;
        let (images, missing_reason) = match images {
            Ok(images) => (images, MISSING_IMAGE_RESULT.to_string()),
            Err(reason) => {
                if run_images {
                    tracing::warn!("{}; all images count as failed", reason);
                }
                (Vec::new(), reason)
            }
        };

        let mut results = merge_results(contents, images, &missing_reason);

        if options.publish {
            self.publish_rows(&mut results);
        }

        let summary = BatchSummary::from_results(&results);
        let report = BatchReport::new(timestamp(), options.variant.label(), &results);
        let prefix = format!("concurrent_results_{}", options.variant.label());
        let report_file = match self.store.write_json(&prefix, None, &report) {
            Ok(path) => {
                tracing::info!("Saved batch report to {}", path.display());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Failed to save batch report: {}", e);
                None
            }
        };

        Ok(BatchOutcome {
            results,
            summary,
            report_file,
        })
    }

    fn rewrite_pipeline(&self, variant: RewriteVariant) -> RewritePipeline<'a> {
        let override_path = match variant {
            RewriteVariant::Native => self.config.paths.native_prompt_file.as_deref(),
            RewriteVariant::Translated => self.config.paths.translated_prompt_file.as_deref(),
        }
        .map(|p| PathsConfig::resolve(&self.project_root, p));

        RewritePipeline::new(self.collaborators.llm, variant)
            .with_template(load_template(variant, override_path.as_deref()))
            .with_tweet_count(self.config.pipeline.tweet_count)
            .with_max_tokens(self.config.llm.max_tokens)
            .with_store(self.store.clone())
    }

    /// Rewrite every topic on a bounded pool; results in input order.
    fn content_stream(
        &self,
        topics: &[Topic],
        variant: RewriteVariant,
    ) -> Result<Vec<ContentResult>, PoolError> {
        let pipeline = self.rewrite_pipeline(variant);
        let pool = WorkerPool::new("rewrite", self.config.pipeline.max_workers)?
            .with_dispatch_delay(self.config.pipeline.dispatch_delay());
        let phase = self.progress.start_phase("Rewrite", topics.len() as u64);

        let items: Vec<(usize, &Topic)> = topics.iter().enumerate().collect();
        let mut indexed = pool.run(
            items,
            |(i, topic)| (*i, self.rewrite_with_retry(&pipeline, topic)),
            |(i, topic), msg| (*i, ContentResult::failed((*topic).clone(), msg)),
            |_| phase.tick(),
        );
        phase.finish();

        indexed.sort_by_key(|(i, _)| *i);
        let results: Vec<ContentResult> = indexed.into_iter().map(|(_, r)| r).collect();
        let ok = results.iter().filter(|r| r.success).count();
        tracing::info!("Content rewriting: {}/{} succeeded", ok, results.len());
        Ok(results)
    }

    /// Retries service errors only, with exponential backoff.
    fn rewrite_with_retry(&self, pipeline: &RewritePipeline<'_>, topic: &Topic) -> ContentResult {
        let max_retries = self.config.pipeline.max_retries;
        let mut attempt = 0usize;
        loop {
            match pipeline.rewrite(topic) {
                Ok((thread, file)) => return ContentResult::succeeded(topic.clone(), thread, file),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let wait = backoff(self.config.pipeline.retry_backoff(), attempt);
                    tracing::warn!(
                        "Rewrite attempt {} for '{}' failed: {} (retrying in {:?})",
                        attempt + 1,
                        topic.title,
                        e,
                        wait
                    );
                    std::thread::sleep(wait);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("Rewrite failed for '{}': {}", topic.title, e);
                    return ContentResult::failed(topic.clone(), e.to_string());
                }
            }
        }
    }

    /// Template matching, prompt composition and image generation.
    fn image_stream(
        &self,
        topics: &[Topic],
        options: &ProcessOptions,
    ) -> Result<Vec<ImageResult>, PoolError> {
        let pipeline = &self.config.pipeline;
        let matcher = TemplateMatcher::new(self.collaborators.catalog, self.collaborators.llm)
            .with_min_custom_chars(pipeline.customize_min_chars)
            .with_max_tokens(self.config.llm.max_tokens);
        let mut batch = BatchPromptGenerator::new(
            matcher,
            self.store.clone(),
            BatchOptions {
                max_workers: pipeline.max_workers,
                compose_prompts: pipeline.compose_prompts,
                save_prompts: options.save_prompts,
            },
        )
        .with_generator(
            PromptGenerator::new(self.collaborators.llm)
                .with_max_tokens(self.config.llm.max_tokens),
        )
        .with_progress(self.progress.clone());

        if let Some(images) = self.collaborators.images {
            let gate = RateGate::new(Duration::from_millis(self.config.image.min_interval_ms));
            batch = batch.with_images(images, gate);
        }

        let prompts = batch.run(topics)?;
        let mut images = batch.run_images(&prompts)?;
        // Topics that never reached the image service keep their prompt-stage reason.
        images.extend(
            prompts
                .into_iter()
                .filter(|p| !p.success)
                .map(|p| ImageResult::failed(p.topic, p.prompt.unwrap_or_default(), p.error)),
        );
        Ok(images)
    }

    /// Publish rows that fully succeeded; record the outcome on each.
    fn publish_rows(&self, results: &mut [MergedResult]) {
        let Some(publisher) = self.collaborators.publisher else {
            tracing::warn!("Publishing requested but no publisher is configured");
            return;
        };
        if !self.config.publishing.enabled {
            tracing::info!("Publishing is disabled in configuration");
            return;
        }

        for row in results.iter_mut().filter(|r| r.overall_success()) {
            let Some(thread) = &row.thread else {
                continue;
            };
            let outcome = match publisher.publish(thread, &row.topic.title, &row.images) {
                Ok(receipt) => PublishOutcome {
                    published: true,
                    posted: receipt.post_ids.len(),
                    location: Some(receipt.location),
                    error: String::new(),
                },
                Err(e) => {
                    tracing::warn!("Publishing '{}' failed: {}", row.topic.title, e);
                    PublishOutcome {
                        published: false,
                        posted: e.posted(),
                        location: None,
                        error: e.to_string(),
                    }
                }
            };
            row.publish = Some(outcome);
        }
    }
}

/// `base * 2^attempt`, saturating.
fn backoff(base: Duration, attempt: usize) -> Duration {
    let factor = 2u32.saturating_pow(u32::try_from(attempt).unwrap_or(u32::MAX));
    base.saturating_mul(factor)
}

/// Join content and image results by topic identity.
///
/// Rows follow `contents` order. Each content row takes the first unclaimed image result
/// with the same title and the same id (both absent counts as the same). Content rows
/// without one get a failed image side carrying `missing_reason`.
pub fn merge_results(
    contents: Vec<ContentResult>,
    images: Vec<ImageResult>,
    missing_reason: &str,
) -> Vec<MergedResult> {
    let mut by_title: HashMap<String, Vec<ImageResult>> = HashMap::new();
    for image in images {
        by_title
            .entry(image.topic.title.clone())
            .or_default()
            .push(image);
    }

    contents
        .into_iter()
        .map(|content| {
            let image = by_title.get_mut(&content.topic.title).and_then(|bucket| {
                let pos = bucket.iter().position(|i| i.topic.id == content.topic.id)?;
                Some(bucket.remove(pos))
            });
            match image {
                Some(image) => MergedResult::merge(content, Some(image)),
                None => MergedResult::without_image(content, missing_reason),
            }
        })
        .collect()
}
