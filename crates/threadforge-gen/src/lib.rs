//! Concurrent thread rewriting and cover-image generation.
//!
//! # Architecture
//!
//! - **provider**: `LlmProvider` trait with an OpenAI-compatible implementation
//! - **image**: `ImageProvider` trait and the chat-style image service
//! - **extract**: lenient JSON extraction from conversational replies
//! - **pool** / **rate**: bounded worker pool and minimum-interval gate
//! - **rewrite**: topic → thread
//! - **matcher**: template catalog, model-assisted matching with keyword fallback
//! - **prompt**: topic classification, cover copy, final image prompt
//! - **batch**: template matching → prompt generation → image generation
//! - **processor**: content and image streams side by side, merged per topic
//! - **publish**: draft and sequential-post publishers
//! - **progress**: terminal progress bars via `indicatif`

pub mod batch;
pub mod extract;
pub mod image;
pub mod matcher;
pub mod pool;
pub mod processor;
pub mod progress;
pub mod prompt;
pub mod provider;
pub mod publish;
pub mod rate;
pub mod rewrite;

pub use batch::{BatchOptions, BatchPromptGenerator};
pub use extract::ShapeError;
pub use image::{ChatImageProvider, ImageArtifact, ImageProvider};
pub use matcher::{CatalogError, MatchError, TemplateCatalog, TemplateMatcher};
pub use pool::{PoolError, WorkerPool};
pub use processor::{BatchOutcome, Collaborators, ConcurrentProcessor, ProcessOptions};
pub use progress::PipelineProgress;
pub use prompt::{PromptError, PromptGenerator, TopicCategory, classify};
#[cfg(feature = "openai")]
pub use provider::OpenAiProvider;
pub use provider::{ChatMessage, LlmProvider, LlmResponse, ProviderError, Role};
pub use publish::{LocalDraftPublisher, PostClient, PublishError, Publisher, SequentialPublisher};
pub use rate::RateGate;
pub use rewrite::{RewriteError, RewritePipeline, RewriteVariant};
