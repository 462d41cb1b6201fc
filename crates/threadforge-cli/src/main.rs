//! CLI binary for threadforge: turn topic lists into threads with cover images.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use threadforge_core::config::{CONFIG_FILE, PathsConfig};
use threadforge_core::{ArtifactStore, BatchReport, ForgeConfig, load_topics};
use threadforge_gen::{
    ChatImageProvider, Collaborators, ConcurrentProcessor, ImageProvider, LocalDraftPublisher,
    OpenAiProvider, PipelineProgress, ProcessOptions, Publisher, RewriteVariant, TemplateCatalog,
};

/// Default topic list inside the input directory.
const DEFAULT_TOPICS_FILE: &str = "topics.txt";
/// Drafts land under the output directory.
const DRAFT_DIR: &str = "drafts";
const REPORT_PREFIX: &str = "concurrent_results_";

#[derive(Parser)]
#[command(name = "threadforge", about = "Topic → thread + cover image generator")]
struct Cli {
    /// Project root directory (defaults to current directory)
    #[arg(short, long, global = true)]
    project: Option<PathBuf>,

    /// Explicit config file (defaults to <project>/threadforge.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite topics into threads and generate cover images
    Run {
        /// Topic file (.json array or one title per line)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Write translated-style threads instead of native ones
        #[arg(long)]
        translated: bool,

        /// Skip template matching and image generation
        #[arg(long)]
        text_only: bool,

        /// Save prompt reports (JSON + markdown)
        #[arg(long)]
        save_prompts: bool,

        /// Publish fully successful topics as local drafts
        #[arg(long)]
        publish: bool,

        /// Worker count for every pool (overrides config)
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        workers: Option<u16>,

        /// Hide progress bars
        #[arg(short, long)]
        quiet: bool,
    },

    /// List the image-style template catalog
    Templates,

    /// Show configuration and collaborator availability (no network)
    Check,

    /// Show the most recent batch reports
    Preview {
        /// Number of reports to show
        #[arg(short = 'n', long, default_value = "5")]
        count: usize,
    },
}

fn get_project_root(cli: &Cli) -> Result<PathBuf> {
    match &cli.project {
        Some(p) => Ok(p.clone()),
        None => std::env::current_dir().context("failed to get current directory"),
    }
}

fn load_config(cli: &Cli, project_root: &Path) -> Result<ForgeConfig> {
    match &cli.config {
        Some(path) => ForgeConfig::load_from(path),
        None => ForgeConfig::load(project_root),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project_root = get_project_root(&cli)?;
    let config = load_config(&cli, &project_root)?;

    match cli.command {
        Commands::Run {
            input,
            translated,
            text_only,
            save_prompts,
            publish,
            workers,
            quiet,
        } => {
            let options = ProcessOptions {
                variant: if translated {
                    RewriteVariant::Translated
                } else {
                    RewriteVariant::Native
                },
                text_only,
                save_prompts,
                publish,
            };
            cmd_run(
                &project_root,
                config,
                input,
                &options,
                workers.map(usize::from),
                quiet,
            )
        }
        Commands::Templates => cmd_templates(&project_root, &config),
        Commands::Check => cmd_check(&project_root, cli.config.as_deref(), &config),
        Commands::Preview { count } => cmd_preview(&project_root, &config, count),
    }
}

fn template_path(project_root: &Path, config: &ForgeConfig) -> PathBuf {
    PathsConfig::resolve(project_root, &config.paths.template_file)
}

fn output_dir(project_root: &Path, config: &ForgeConfig) -> PathBuf {
    PathsConfig::resolve(project_root, &config.paths.output_dir)
}

fn cmd_run(
    project_root: &Path,
    mut config: ForgeConfig,
    input: Option<PathBuf>,
    options: &ProcessOptions,
    workers: Option<usize>,
    quiet: bool,
) -> Result<()> {
    if let Some(n) = workers {
        config.pipeline.max_workers = n;
    }
    if options.publish && !config.publishing.enabled {
        eprintln!("Publishing is disabled in config; set [publishing] enabled = true to publish.");
    }

    let input = input.unwrap_or_else(|| {
        PathsConfig::resolve(project_root, &config.paths.input_dir).join(DEFAULT_TOPICS_FILE)
    });
    let topics = load_topics(&input)
        .with_context(|| format!("failed to load topics from {}", input.display()))?;
    if topics.is_empty() {
        anyhow::bail!("No topics found in {}", input.display());
    }

    let want_images = !options.text_only && config.image.enabled;

    let catalog = if want_images {
        let path = template_path(project_root, &config);
        match TemplateCatalog::load(&path) {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!("{}; every image will fail template matching", e);
                TemplateCatalog::default()
            }
        }
    } else {
        TemplateCatalog::default()
    };

    let llm = OpenAiProvider::from_config(&config.llm).context("text service unavailable")?;

    let image_provider = if want_images {
        match ChatImageProvider::from_config(&config.image, config.image_api_key()) {
            Ok(provider) => Some(provider),
            Err(e) => {
                tracing::warn!("Image service unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let drafts = LocalDraftPublisher::new(ArtifactStore::new(
        output_dir(project_root, &config).join(DRAFT_DIR),
    ));

    let collaborators = Collaborators {
        llm: &llm,
        images: image_provider.as_ref().map(|p| p as &dyn ImageProvider),
        catalog: &catalog,
        publisher: options.publish.then_some(&drafts as &dyn Publisher),
    };

    let progress = if quiet {
        PipelineProgress::hidden()
    } else {
        PipelineProgress::new()
    };

    eprintln!(
        "Processing {} topics from {} ({} threads, {} workers)",
        topics.len(),
        input.display(),
        options.variant.label(),
        config.pipeline.max_workers
    );

    let processor =
        ConcurrentProcessor::new(collaborators, config, project_root).with_progress(progress);
    let outcome = processor.process_topics(&topics, options)?;

    println!("{}", outcome.summary);
    for row in &outcome.results {
        if !row.overall_success() {
            println!("  [{:?}] {}: {}", row.state(), row.topic.title, row.reason());
        }
    }
    if let Some(report) = &outcome.report_file {
        println!("Report: {}", report.display());
    }
    Ok(())
}

fn cmd_templates(project_root: &Path, config: &ForgeConfig) -> Result<()> {
    let path = template_path(project_root, config);
    let catalog = TemplateCatalog::load(&path)?;

    println!("{} templates in {}", catalog.len(), path.display());
    println!();
    for template in catalog.templates() {
        let keywords = if template.keywords.is_empty() {
            "-".to_string()
        } else {
            template.keywords.join(", ")
        };
        println!(
            "  case {:>3}  {}  [{}]",
            template.case_number, template.title, keywords
        );
    }
    Ok(())
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

fn cmd_check(
    project_root: &Path,
    explicit_config: Option<&Path>,
    config: &ForgeConfig,
) -> Result<()> {
    let config_path = explicit_config
        .map_or_else(|| project_root.join(CONFIG_FILE), Path::to_path_buf);
    let has_key = |key: Option<&str>| key.is_some_and(|k| !k.trim().is_empty());

    println!(
        "Config: {} ({})",
        config_path.display(),
        if config_path.exists() { "loaded" } else { "defaults" }
    );
    println!();
    println!("Text service");
    println!("  Base URL: {}", config.llm.normalized_base());
    println!("  Model: {}", config.llm.model);
    println!("  API key: {}", yes_no(has_key(config.llm.api_key.as_deref())));
    println!();
    println!("Image service");
    println!("  Enabled: {}", yes_no(config.image.enabled));
    println!("  URL: {}", config.image.api_url);
    println!("  Model: {}", config.image.model);
    println!("  API key: {}", yes_no(has_key(config.image_api_key())));
    println!("  Min interval: {} ms", config.image.min_interval_ms);
    println!();

    let path = template_path(project_root, config);
    match TemplateCatalog::load(&path) {
        Ok(catalog) => println!("Templates: {} in {}", catalog.len(), path.display()),
        Err(e) => println!("Templates: unavailable ({})", e),
    }
    println!(
        "Workers: {} (retries {}, dispatch delay {} ms)",
        config.pipeline.max_workers, config.pipeline.max_retries, config.pipeline.dispatch_delay_ms
    );
    println!("Publishing: {}", yes_no(config.publishing.enabled));
    println!("Output: {}", output_dir(project_root, config).display());
    Ok(())
}

/// Batch reports in `dir`, newest first.
fn recent_reports(dir: &Path) -> Result<Vec<(PathBuf, std::time::SystemTime)>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read output directory {}", dir.display()))?;

    let mut reports: Vec<(PathBuf, std::time::SystemTime)> = entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(REPORT_PREFIX) && name.ends_with(".json")
        })
        .filter_map(|entry| {
            let modified = entry.metadata().and_then(|m| m.modified()).ok()?;
            Some((entry.path(), modified))
        })
        .collect();
    reports.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    Ok(reports)
}

fn cmd_preview(project_root: &Path, config: &ForgeConfig, count: usize) -> Result<()> {
    let dir = output_dir(project_root, config);
    if !dir.exists() {
        eprintln!("No output directory at {}. Run `threadforge run` first.", dir.display());
        return Ok(());
    }

    let reports = recent_reports(&dir)?;
    if reports.is_empty() {
        eprintln!("No batch reports in {}", dir.display());
        return Ok(());
    }

    for (path, modified) in reports.into_iter().take(count) {
        let modified: chrono::DateTime<chrono::Local> = modified.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let report = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str::<BatchReport>(&s).ok());

        match report {
            Some(report) => {
                let s = &report.summary;
                println!("{} ({})", name, modified.format("%Y-%m-%d %H:%M:%S"));
                println!(
                    "  mode {}, topics {}, content {}, images {}, overall {}, published {}",
                    report.language_mode,
                    s.total_topics,
                    s.content_success_count,
                    s.image_success_count,
                    s.overall_success_count,
                    s.published_count
                );
            }
            None => println!("{} (unreadable)", name),
        }
    }
    Ok(())
}
