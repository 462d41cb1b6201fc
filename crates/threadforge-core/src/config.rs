//! Configuration for the threadforge pipeline.
//!
//! Load order: `threadforge.toml` (or an explicit path) → environment variables → defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file name, looked up in the project root.
pub const CONFIG_FILE: &str = "threadforge.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    pub llm: LlmConfig,
    pub image: ImageConfig,
    pub pipeline: PipelineConfig,
    pub paths: PathsConfig,
    pub publishing: PublishingConfig,
}

/// Text-completion endpoint (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL; a trailing `/v1` is appended when missing.
    pub api_base: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

/// Image-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub enabled: bool,
    pub api_url: String,
    pub model: String,
    /// Falls back to `llm.api_key` when unset.
    pub api_key: Option<String>,
    /// Minimum spacing between image requests across all workers. 0 disables the gate.
    pub min_interval_ms: u64,
    pub connect_timeout_secs: u64,
    /// Image generation can take minutes.
    pub read_timeout_secs: u64,
    pub download_timeout_secs: u64,
}

/// Concurrency and shaping knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Workers per phase pool. Kept low to respect upstream rate limits.
    pub max_workers: usize,
    /// Pause between dispatching consecutive rewrite tasks.
    pub dispatch_delay_ms: u64,
    /// Extra rewrite attempts after a service error.
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
    /// Tweets requested per thread.
    pub tweet_count: usize,
    /// Customized image prompts at or below this length are discarded.
    pub customize_min_chars: usize,
    /// Run the customized prompt through the cover-copy composer.
    pub compose_prompts: bool,
}

/// Input and output locations, relative to the project root unless absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub template_file: PathBuf,
    pub native_prompt_file: Option<PathBuf>,
    pub translated_prompt_file: Option<PathBuf>,
}

/// Publishing is off unless explicitly enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    pub enabled: bool,
    /// Pause between consecutive posts of one thread.
    pub post_delay_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.tu-zi.com/v1".to_string(),
            model: "chatgpt-4o-latest".to_string(),
            api_key: None,
            max_tokens: 2000,
            connect_timeout_secs: 30,
            read_timeout_secs: 300,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.tu-zi.com/v1/chat/completions".to_string(),
            model: "gpt-4o-image".to_string(),
            api_key: None,
            min_interval_ms: 1000,
            connect_timeout_secs: 30,
            read_timeout_secs: 600,
            download_timeout_secs: 120,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            dispatch_delay_ms: 1000,
            max_retries: 1,
            retry_backoff_ms: 2000,
            tweet_count: 6,
            customize_min_chars: 50,
            compose_prompts: true,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            template_file: PathBuf::from("input/image_prompt_template.md"),
            native_prompt_file: None,
            translated_prompt_file: None,
        }
    }
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            post_delay_ms: 2000,
        }
    }
}

impl LlmConfig {
    /// `api_base` normalized to end in `/v1`.
    pub fn normalized_base(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        if base.ends_with("/v1") {
            base.to_string()
        } else {
            format!("{}/v1", base)
        }
    }
}

impl PipelineConfig {
    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.dispatch_delay_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl PathsConfig {
    /// Resolve a configured path against the project root.
    pub fn resolve(project_root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_root.join(path)
        }
    }
}

/// Helper to parse an env var and apply it to a config field.
fn env_override<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(n) = v.parse()
    {
        *target = n;
    }
}

/// Boolean env vars follow the `true`/`false` convention, case-insensitive.
fn env_flag(var: &str, target: &mut bool) {
    if let Ok(v) = std::env::var(var) {
        *target = v.trim().eq_ignore_ascii_case("true");
    }
}

fn env_string(var: &str, target: &mut Option<String>) {
    if let Ok(v) = std::env::var(var)
        && !v.trim().is_empty()
    {
        *target = Some(v);
    }
}

impl ForgeConfig {
    /// Load `threadforge.toml` from the project root, with env var overrides.
    /// Falls back to defaults if no config file exists.
    pub fn load(project_root: &Path) -> Result<Self> {
        Self::load_from(&project_root.join(CONFIG_FILE))
    }

    /// Load from an explicit file path, with env var overrides.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("invalid config in {}", config_path.display()))?
        } else {
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        env_string("OPENAI_API_KEY", &mut self.llm.api_key);
        env_override("OPENAI_API_BASE", &mut self.llm.api_base);
        env_override("OPENAI_MODEL", &mut self.llm.model);

        env_string("IMAGE_API_TOKEN", &mut self.image.api_key);
        env_override("IMAGE_API_URL", &mut self.image.api_url);
        env_override("IMAGE_MODEL", &mut self.image.model);
        env_flag("ENABLE_IMAGE_GENERATION", &mut self.image.enabled);

        env_flag("ENABLE_PUBLISHING", &mut self.publishing.enabled);

        env_override("INPUT_DIR", &mut self.paths.input_dir);
        env_override("OUTPUT_DIR", &mut self.paths.output_dir);

        env_override("THREADFORGE_MAX_WORKERS", &mut self.pipeline.max_workers);
        env_override("THREADFORGE_MAX_RETRIES", &mut self.pipeline.max_retries);
        env_override("THREADFORGE_TWEET_COUNT", &mut self.pipeline.tweet_count);
    }

    fn validate(&self) -> Result<()> {
        if self.pipeline.max_workers == 0 {
            anyhow::bail!("pipeline.max_workers must be at least 1");
        }
        if self.pipeline.tweet_count == 0 {
            anyhow::bail!("pipeline.tweet_count must be at least 1");
        }
        Ok(())
    }

    /// The image API key, falling back to the text API key.
    pub fn image_api_key(&self) -> Option<&str> {
        self.image
            .api_key
            .as_deref()
            .or(self.llm.api_key.as_deref())
    }
}
