use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use threadforge_core::{ArtifactStore, ContentLevel, ForgeConfig, Thread, Topic, TopicState};
use threadforge_gen::image::ImageArtifact;
use threadforge_gen::matcher::TemplateCatalog;
use threadforge_gen::{
    BatchOptions, BatchPromptGenerator, ChatMessage, Collaborators, ConcurrentProcessor,
    ImageProvider, LlmProvider, LlmResponse, LocalDraftPublisher, ProcessOptions, PromptGenerator,
    ProviderError, RewriteError, RewritePipeline, RewriteVariant, ShapeError, TemplateMatcher,
    TopicCategory, classify,
};

const CATALOG: &str = "\
## 案例 1：小红书封面\n\n```\nCover style prompt\n```\n\n\
## 案例 2：复古宣传海报\n\n```\nRetro poster prompt\n```\n";

const THREAD_REPLY: &str =
    r#"Here you go: [{"tweet":"1/ hook"},{"tweet":"2/ body"},{"tweet":"3/ end"}] enjoy"#;

/// Text service that answers by request kind.
struct FakeLlm {
    rewrite_reply: Box<dyn Fn(usize) -> Result<String, ProviderError> + Send + Sync>,
    rewrite_calls: AtomicUsize,
    compose_fails: bool,
}

impl FakeLlm {
    fn new() -> Self {
        Self::with_rewrite(|_| Ok(THREAD_REPLY.to_string()))
    }

    fn with_rewrite(
        reply: impl Fn(usize) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            rewrite_reply: Box::new(reply),
            rewrite_calls: AtomicUsize::new(0),
            compose_fails: false,
        }
    }

    /// Prompt composition replies carry neither JSON nor a visual marker.
    fn composing_nothing(mut self) -> Self {
        self.compose_fails = true;
        self
    }
}

fn title_line(text: &str) -> String {
    text.lines()
        .find_map(|l| l.trim().strip_prefix("- 标题："))
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

impl LlmProvider for FakeLlm {
    fn complete(
        &self,
        messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<LlmResponse, ProviderError> {
        let user = &messages.last().unwrap().content;
        let system = messages
            .iter()
            .find(|m| m.role == threadforge_gen::Role::System)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let text = if system.contains("image_prompt") && self.compose_fails {
            "抱歉，这次想不出来。".to_string()
        } else if system.contains("image_prompt") {
            format!("{{\"image_prompt\": \"cover for {}\"}}", title_line(user))
        } else if user.contains("可选模板列表") {
            "案例 1 最合适".to_string()
        } else if user.contains("定制后的提示词") {
            format!("customized style for {} {}", title_line(user), "x".repeat(60))
        } else {
            let n = self.rewrite_calls.fetch_add(1, Ordering::SeqCst);
            (self.rewrite_reply)(n)?
        };
        Ok(LlmResponse {
            text,
            ..LlmResponse::default()
        })
    }

    fn model_name(&self) -> &str {
        "fake"
    }
}

/// Image service that panics for prompts mentioning `panic_on`.
struct FakeImages {
    panic_on: Option<String>,
    calls: AtomicUsize,
    downloads: Mutex<Vec<String>>,
}

impl FakeImages {
    fn new(panic_on: Option<&str>) -> Self {
        Self {
            panic_on: panic_on.map(String::from),
            calls: AtomicUsize::new(0),
            downloads: Mutex::new(Vec::new()),
        }
    }
}

impl ImageProvider for FakeImages {
    fn generate(&self, prompt: &str) -> Result<Vec<ImageArtifact>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(p) = &self.panic_on
            && prompt.contains(p.as_str())
        {
            panic!("image backend crashed");
        }
        Ok(vec![
            ImageArtifact::from_url("https://filesystem.site/cdn/first.png"),
            ImageArtifact::from_url("https://example.com/second.jpg"),
        ])
    }

    fn download(&self, artifact: &ImageArtifact) -> Result<Vec<u8>, ProviderError> {
        self.downloads.lock().unwrap().push(artifact.url.clone());
        Ok(b"\x89PNG fake".to_vec())
    }
}

fn config(workers: usize) -> ForgeConfig {
    let mut config = ForgeConfig::default();
    config.pipeline.max_workers = workers;
    config.pipeline.dispatch_delay_ms = 0;
    config.pipeline.retry_backoff_ms = 1;
    config.image.min_interval_ms = 0;
    config
}

fn topics(n: usize) -> Vec<Topic> {
    (1..=n)
        .map(|i| Topic {
            keywords: "AI、编程".to_string(),
            ..Topic::from_title(format!("topic-{}", i))
        })
        .collect()
}

fn processor<'a>(
    llm: &'a FakeLlm,
    images: Option<&'a FakeImages>,
    catalog: &'a TemplateCatalog,
    config: ForgeConfig,
    root: &Path,
) -> ConcurrentProcessor<'a> {
    ConcurrentProcessor::new(
        Collaborators {
            llm,
            images: images.map(|i| i as &dyn ImageProvider),
            catalog,
            publisher: None,
        },
        config,
        root,
    )
}

#[test]
fn test_ai_topic_gets_prompt() {
    let topic = Topic {
        keywords: "AI、编程".to_string(),
        level: ContentLevel::Likely,
        ..Topic::from_title("AI编程工具上线")
    };
    assert_eq!(classify(&topic), TopicCategory::AiTech);

    let llm = FakeLlm::new();
    let prompt = PromptGenerator::new(&llm).generate(&topic).unwrap();
    assert_eq!(prompt, "cover for AI编程工具上线");
}

#[test]
fn test_commentary_around_array_is_tolerated() {
    let llm = FakeLlm::with_rewrite(|_| {
        Ok(r#"Sure! Here's your thread: [{"tweet":"a"},{"tweet":"b"}] Hope that helps!"#.into())
    });
    let thread = RewritePipeline::new(&llm, RewriteVariant::Native)
        .generate_thread(&Topic::from_title("t"))
        .unwrap();
    assert_eq!(thread, Thread::from_texts(["a", "b"]));
}

#[test]
fn test_reply_without_array_fails_content() {
    let llm = FakeLlm::with_rewrite(|_| Ok("I cannot produce a thread today.".into()));
    let err = RewritePipeline::new(&llm, RewriteVariant::Native)
        .generate_thread(&Topic::from_title("t"))
        .unwrap_err();
    assert!(matches!(err, RewriteError::Shape(ShapeError::NoArrayFound)));

    let tmp = TempDir::new().unwrap();
    let catalog = TemplateCatalog::parse(CATALOG);
    let outcome = processor(&llm, None, &catalog, config(2), tmp.path())
        .process_topics(
            &[Topic::from_title("t")],
            &ProcessOptions {
                text_only: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert!(!outcome.results[0].content_success);
    assert!(outcome.results[0].content_error.contains("no JSON array"));
    // One direct call plus one from the processor: shape errors are not retried.
    assert_eq!(llm.rewrite_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_one_image_fault_is_isolated() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let images = FakeImages::new(Some("topic-3"));
    let catalog = TemplateCatalog::parse(CATALOG);

    let outcome = processor(&llm, Some(&images), &catalog, config(3), tmp.path())
        .process_topics(&topics(5), &ProcessOptions::default())
        .unwrap();

    assert_eq!(outcome.results.len(), 5);
    for (i, row) in outcome.results.iter().enumerate() {
        assert_eq!(row.topic.title, format!("topic-{}", i + 1), "input order kept");
        assert!(row.content_success);
        if i == 2 {
            assert!(!row.image_success);
            assert!(!row.overall_success());
            assert_eq!(row.state(), TopicState::Partial);
            assert!(row.image_error.contains("image backend crashed"));
        } else {
            assert!(row.image_success, "row {} should have an image", i + 1);
            assert!(row.overall_success());
            assert_eq!(row.images.len(), 1);
        }
    }
    assert_eq!(outcome.summary.overall_success_count, 4);
    assert!(outcome.report_file.is_some());
}

#[test]
fn test_empty_catalog_fails_every_prompt() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let catalog = TemplateCatalog::default();
    let batch = BatchPromptGenerator::new(
        TemplateMatcher::new(&catalog, &llm),
        ArtifactStore::new(tmp.path()),
        BatchOptions::default(),
    );

    let results = batch.run(&topics(4)).unwrap();
    assert_eq!(results.len(), 4);
    for r in &results {
        assert!(!r.success);
        assert!(r.template.is_none());
        assert!(r.error.contains("template matching"), "error was: {}", r.error);
    }
    assert!(batch.run_images(&results).unwrap().is_empty());
}

#[test]
fn test_cardinality_holds_for_any_pool_size() {
    let catalog = TemplateCatalog::parse(CATALOG);
    for workers in [1, 2, 5, 16] {
        let tmp = TempDir::new().unwrap();
        let llm = FakeLlm::new();
        let images = FakeImages::new(None);
        let outcome = processor(&llm, Some(&images), &catalog, config(workers), tmp.path())
            .process_topics(&topics(7), &ProcessOptions::default())
            .unwrap();
        assert_eq!(outcome.results.len(), 7, "workers = {}", workers);
        assert_eq!(outcome.summary.total_topics, 7);
        assert_eq!(outcome.summary.overall_success_count, 7);
        assert_eq!(images.calls.load(Ordering::SeqCst), 7);
    }
}

#[test]
fn test_only_first_image_link_is_downloaded() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let images = FakeImages::new(None);
    let catalog = TemplateCatalog::parse(CATALOG);
    let outcome = processor(&llm, Some(&images), &catalog, config(1), tmp.path())
        .process_topics(&topics(1), &ProcessOptions::default())
        .unwrap();

    let downloads = images.downloads.lock().unwrap();
    assert_eq!(*downloads, vec!["https://filesystem.site/cdn/first.png".to_string()]);
    let path = &outcome.results[0].images[0];
    assert!(path.starts_with(tmp.path().join("output").join("images")));
    assert_eq!(path.extension().unwrap(), "png");
}

#[test]
fn test_service_errors_are_retried_then_succeed() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::with_rewrite(|n| {
        if n == 0 {
            Err(ProviderError::Http("connection reset".into()))
        } else {
            Ok(THREAD_REPLY.to_string())
        }
    });
    let catalog = TemplateCatalog::parse(CATALOG);
    let outcome = processor(&llm, None, &catalog, config(1), tmp.path())
        .process_topics(
            &[Topic::from_title("retry me")],
            &ProcessOptions {
                text_only: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();
    assert!(outcome.results[0].content_success);
    assert_eq!(llm.rewrite_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_retries_are_bounded() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::with_rewrite(|_| Err(ProviderError::EmptyResponse));
    let catalog = TemplateCatalog::parse(CATALOG);
    let mut cfg = config(1);
    cfg.pipeline.max_retries = 2;
    let outcome = processor(&llm, None, &catalog, cfg, tmp.path())
        .process_topics(
            &[Topic::from_title("never")],
            &ProcessOptions {
                text_only: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();
    assert!(!outcome.results[0].content_success);
    assert_eq!(llm.rewrite_calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_persisted_thread_roundtrips() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let catalog = TemplateCatalog::parse(CATALOG);
    let outcome = processor(&llm, None, &catalog, config(2), tmp.path())
        .process_topics(
            &topics(2),
            &ProcessOptions {
                text_only: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();

    for row in &outcome.results {
        let file = row.thread_file.as_ref().expect("thread was persisted");
        let loaded: Thread = serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
        let original = row.thread.as_ref().unwrap();
        assert_eq!(loaded.len(), original.len());
        assert!(loaded.texts().eq(original.texts()));
    }
}

#[test]
fn test_text_only_rows_are_partial_and_not_published() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let catalog = TemplateCatalog::parse(CATALOG);
    let drafts = LocalDraftPublisher::new(ArtifactStore::new(tmp.path().join("drafts")));
    let mut cfg = config(2);
    cfg.publishing.enabled = true;

    let processor = ConcurrentProcessor::new(
        Collaborators {
            llm: &llm,
            images: None,
            catalog: &catalog,
            publisher: Some(&drafts),
        },
        cfg,
        tmp.path(),
    );
    let outcome = processor
        .process_topics(
            &topics(2),
            &ProcessOptions {
                text_only: true,
                publish: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();

    assert!(outcome.results.iter().all(|r| r.state() == TopicState::Partial));
    assert!(outcome.results.iter().all(|r| r.publish.is_none()));
    assert!(!tmp.path().join("drafts").exists());
}

#[test]
fn test_successful_rows_are_published() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let images = FakeImages::new(Some("topic-2"));
    let catalog = TemplateCatalog::parse(CATALOG);
    let drafts = LocalDraftPublisher::new(ArtifactStore::new(tmp.path().join("drafts")));
    let mut cfg = config(2);
    cfg.publishing.enabled = true;

    let processor = ConcurrentProcessor::new(
        Collaborators {
            llm: &llm,
            images: Some(&images),
            catalog: &catalog,
            publisher: Some(&drafts),
        },
        cfg,
        tmp.path(),
    );
    let outcome = processor
        .process_topics(
            &topics(3),
            &ProcessOptions {
                publish: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();

    let published: Vec<_> = outcome
        .results
        .iter()
        .map(|r| r.publish.as_ref().is_some_and(|p| p.published))
        .collect();
    assert_eq!(published, vec![true, false, true]);
    assert_eq!(outcome.summary.published_count, 2);
    assert_eq!(std::fs::read_dir(tmp.path().join("drafts")).unwrap().count(), 2);
}

#[test]
fn test_batch_report_is_written_with_every_row() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let catalog = TemplateCatalog::parse(CATALOG);
    let outcome = processor(&llm, None, &catalog, config(2), tmp.path())
        .process_topics(
            &topics(3),
            &ProcessOptions {
                variant: RewriteVariant::Translated,
                text_only: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();

    let report = outcome.report_file.unwrap();
    let name = report.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("concurrent_results_translated_"));
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["language_mode"], "translated");
    assert_eq!(json["total_topics"], 3);
    assert_eq!(json["results"].as_array().unwrap().len(), 3);
    assert_eq!(json["results"][0]["state"], "partial");
}

#[test]
fn test_save_prompts_writes_both_reports() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let catalog = TemplateCatalog::parse(CATALOG);
    let batch = BatchPromptGenerator::new(
        TemplateMatcher::new(&catalog, &llm),
        ArtifactStore::new(tmp.path()),
        BatchOptions {
            save_prompts: true,
            ..BatchOptions::default()
        },
    )
    .with_generator(PromptGenerator::new(&llm));

    let results = batch.run(&topics(2)).unwrap();
    assert!(results.iter().all(|r| r.success));
    assert!(results.iter().all(|r| r.template.as_ref().unwrap().case_number == "1"));

    let names: Vec<String> = std::fs::read_dir(tmp.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.starts_with("batch_prompts_") && n.ends_with(".json")));
    assert!(names.iter().any(|n| n.starts_with("detailed_prompts_") && n.ends_with(".md")));
}

#[test]
fn test_compose_off_uses_customized_prompt() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let catalog = TemplateCatalog::parse(CATALOG);
    let batch = BatchPromptGenerator::new(
        TemplateMatcher::new(&catalog, &llm),
        ArtifactStore::new(tmp.path()),
        BatchOptions {
            compose_prompts: false,
            ..BatchOptions::default()
        },
    )
    .with_generator(PromptGenerator::new(&llm));

    let results = batch.run(&topics(1)).unwrap();
    assert!(results[0]
        .prompt
        .as_deref()
        .unwrap()
        .starts_with("customized style for topic-1"));
}

fn image_errors(outcome: &threadforge_gen::BatchOutcome) -> Vec<&str> {
    outcome.results.iter().map(|r| r.image_error.as_str()).collect()
}

#[test]
fn test_unmatched_topics_keep_matching_error() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let images = FakeImages::new(None);
    let catalog = TemplateCatalog::default();
    let outcome = processor(&llm, Some(&images), &catalog, config(2), tmp.path())
        .process_topics(&topics(3), &ProcessOptions::default())
        .unwrap();

    assert_eq!(outcome.results.len(), 3);
    for row in &outcome.results {
        assert!(row.content_success);
        assert!(!row.image_success);
        assert!(
            row.image_error.contains("template matching failed"),
            "error was: {}",
            row.image_error
        );
    }
    assert_eq!(images.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unparseable_composition_keeps_prompt_error() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new().composing_nothing();
    let images = FakeImages::new(None);
    let catalog = TemplateCatalog::parse(CATALOG);
    let outcome = processor(&llm, Some(&images), &catalog, config(2), tmp.path())
        .process_topics(&topics(2), &ProcessOptions::default())
        .unwrap();

    for row in &outcome.results {
        assert!(!row.image_success);
        assert!(
            row.image_error.starts_with("prompt generation failed"),
            "error was: {}",
            row.image_error
        );
    }
    assert_eq!(images.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_text_only_rows_say_images_were_skipped() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let images = FakeImages::new(None);
    let catalog = TemplateCatalog::parse(CATALOG);
    let outcome = processor(&llm, Some(&images), &catalog, config(2), tmp.path())
        .process_topics(
            &topics(2),
            &ProcessOptions {
                text_only: true,
                ..ProcessOptions::default()
            },
        )
        .unwrap();

    assert_eq!(
        image_errors(&outcome),
        vec![threadforge_gen::processor::TEXT_ONLY_REASON; 2]
    );
    assert_eq!(images.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_disabled_images_are_reported_as_disabled() {
    let tmp = TempDir::new().unwrap();
    let llm = FakeLlm::new();
    let images = FakeImages::new(None);
    let catalog = TemplateCatalog::parse(CATALOG);
    let mut cfg = config(2);
    cfg.image.enabled = false;
    let outcome = processor(&llm, Some(&images), &catalog, cfg, tmp.path())
        .process_topics(&topics(2), &ProcessOptions::default())
        .unwrap();

    assert_eq!(
        image_errors(&outcome),
        vec![threadforge_gen::processor::IMAGES_DISABLED_REASON; 2]
    );
    assert_eq!(images.calls.load(Ordering::SeqCst), 0);
}
