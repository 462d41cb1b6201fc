//! Image-completion service: a chat-style endpoint that replies with download links.

use crate::provider::{ProviderError, http_agent, map_ureq_error, parse_chat_envelope};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use threadforge_core::config::ImageConfig;

/// Largest image body accepted from a download link.
const MAX_IMAGE_BYTES: u64 = 32 * 1024 * 1024;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp"];

/// A downloadable image reference returned by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub url: String,
    /// File extension derived from the URL.
    pub extension: String,
}

impl ImageArtifact {
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let extension = extension_for(&url).to_string();
        Self { url, extension }
    }
}

/// Abstraction over image-completion services.
pub trait ImageProvider: Send + Sync {
    /// Request images for `prompt`; returns the references in preference order.
    fn generate(&self, prompt: &str) -> Result<Vec<ImageArtifact>, ProviderError>;

    /// Fetch the bytes of one artifact.
    fn download(&self, artifact: &ImageArtifact) -> Result<Vec<u8>, ProviderError>;
}

/// Extension of the last path segment if it is a known image type, else `png`.
pub fn extension_for(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    last.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .and_then(|ext| IMAGE_EXTENSIONS.iter().copied().find(|known| *known == ext))
        .unwrap_or("png")
}

fn link_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"\[(?:点击下载|Click to download)\]\((https?://[^\s)]+)\)",
            r"(https?://filesystem\.site/\S+?\.(?:png|jpg|jpeg|gif|webp))",
            r"(https?://\S+?/cdn/\S+?\.(?:png|jpg|jpeg|gif|webp))",
            r"!\[[^\]]*\]\((https?://[^\s)]+)\)",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

/// Pull image download links out of a reply.
///
/// Links are de-duplicated in first-seen order, `videos.openai.com` links are dropped and
/// `filesystem.site` links are moved to the front.
pub fn extract_image_links(content: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for re in link_patterns() {
        for caps in re.captures_iter(content) {
            if let Some(m) = caps.get(1) {
                let link = m.as_str().to_string();
                if !seen.contains(&link) {
                    seen.push(link);
                }
            }
        }
    }

    let (preferred, rest): (Vec<String>, Vec<String>) = seen
        .into_iter()
        .filter(|link| {
            let keep = !link.contains("videos.openai.com");
            if !keep {
                tracing::debug!("Skipping video link {}", link);
            }
            keep
        })
        .partition(|link| link.contains("filesystem.site"));

    preferred.into_iter().chain(rest).collect()
}

/// Image service speaking the chat-completions protocol.
pub struct ChatImageProvider {
    api_url: String,
    api_key: String,
    model: String,
    agent: ureq::Agent,
    download_agent: ureq::Agent,
}

impl ChatImageProvider {
    pub fn new(api_url: String, api_key: String, model: String, config: &ImageConfig) -> Self {
        let connect = Duration::from_secs(config.connect_timeout_secs);
        Self {
            api_url,
            api_key,
            model,
            agent: http_agent(connect, Duration::from_secs(config.read_timeout_secs)),
            download_agent: http_agent(
                connect,
                Duration::from_secs(config.download_timeout_secs),
            ),
        }
    }

    /// Build from the `[image]` section, with the resolved API key.
    pub fn from_config(config: &ImageConfig, api_key: Option<&str>) -> Result<Self, ProviderError> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ProviderError::NotConfigured("IMAGE_API_TOKEN is not set".into()))?;
        Ok(Self::new(
            config.api_url.clone(),
            api_key.to_string(),
            config.model.clone(),
            config,
        ))
    }
}

impl ImageProvider for ChatImageProvider {
    fn generate(&self, prompt: &str) -> Result<Vec<ImageArtifact>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "user", "content": prompt}
            ]
        });

        let mut response = self
            .agent
            .post(&self.api_url)
            .header("Authorization", &format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .send_json(&body)
            .map_err(map_ureq_error)?;

        let json: Value = response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = parse_chat_envelope(&json)?.text;
        let links = extract_image_links(&content);
        tracing::debug!("Image reply has {} candidate link(s)", links.len());
        Ok(links.into_iter().map(ImageArtifact::from_url).collect())
    }

    fn download(&self, artifact: &ImageArtifact) -> Result<Vec<u8>, ProviderError> {
        let mut response = self
            .download_agent
            .get(&artifact.url)
            .call()
            .map_err(map_ureq_error)?;

        let bytes = response
            .body_mut()
            .with_config()
            .limit(MAX_IMAGE_BYTES)
            .read_to_vec()
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if bytes.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(bytes)
    }
}
