//! Core types and storage for threadforge.
//!
//! Provides the topic model ([`topic::Topic`]), threads, image-style templates, the
//! per-stage result records and their merged report, configuration, and the write-once
//! artifact store.

pub mod config;
pub mod results;
pub mod storage;
pub mod template;
pub mod thread;
pub mod topic;

pub use config::ForgeConfig;
pub use results::{
    BatchReport, BatchSummary, ContentResult, ImageResult, MergedResult, PromptResult,
    PublishOutcome, TopicState,
};
pub use storage::{ArtifactStore, StoreError};
pub use template::Template;
pub use thread::{Thread, Tweet};
pub use topic::{ContentLevel, Topic, TopicError, load_topics};
