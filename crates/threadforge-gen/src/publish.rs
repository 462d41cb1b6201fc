//! Publishing completed threads.
//!
//! [`LocalDraftPublisher`] writes a draft document to disk. [`SequentialPublisher`] posts a
//! thread one tweet at a time through a [`PostClient`], chaining each post as a reply to
//! the previous one.

use crate::provider::ProviderError;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use threadforge_core::storage::{ArtifactStore, StoreError, timestamp};
use threadforge_core::Thread;

/// Errors from publishing a thread.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("thread has no postable tweets")]
    EmptyThread,
    #[error("first post failed: {0}")]
    Post(String),
    /// A prefix of the thread went out before a later post failed.
    #[error(
        "published {} of {total} posts, post {failed_at} failed: {reason}",
        .published.len()
    )]
    Partial {
        /// Ids of the posts that went out, in order.
        published: Vec<String>,
        total: usize,
        /// 1-based position of the failed post.
        failed_at: usize,
        reason: String,
    },
    #[error("failed to write draft: {0}")]
    Store(#[from] StoreError),
}

impl PublishError {
    /// Number of posts that went out before the failure.
    pub fn posted(&self) -> usize {
        match self {
            Self::Partial { published, .. } => published.len(),
            _ => 0,
        }
    }
}

/// Proof of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Where the thread ended up: a draft path or the first post id.
    pub location: String,
    pub post_ids: Vec<String>,
}

/// Accepts a completed thread plus optional image references.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        thread: &Thread,
        title: &str,
        images: &[PathBuf],
    ) -> Result<PublishReceipt, PublishError>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct DraftRecord<'a> {
    timestamp: String,
    topic: &'a str,
    thread: &'a Thread,
    images: &'a [PathBuf],
    status: &'static str,
    platform: &'static str,
}

/// Writes `draft_<ts>_<title>.json` documents instead of posting.
pub struct LocalDraftPublisher {
    store: ArtifactStore,
}

impl LocalDraftPublisher {
    pub fn new(store: ArtifactStore) -> Self {
        Self { store }
    }
}

impl Publisher for LocalDraftPublisher {
    fn publish(
        &self,
        thread: &Thread,
        title: &str,
        images: &[PathBuf],
    ) -> Result<PublishReceipt, PublishError> {
        if thread.is_empty() {
            return Err(PublishError::EmptyThread);
        }
        let record = DraftRecord {
            timestamp: timestamp(),
            topic: title,
            thread,
            images,
            status: "draft",
            platform: "local",
        };
        let path = self.store.write_json("draft", Some(title), &record)?;
        tracing::info!("Saved draft for '{}' to {}", title, path.display());
        Ok(PublishReceipt {
            location: path.display().to_string(),
            post_ids: Vec::new(),
        })
    }

    fn name(&self) -> &str {
        "local-draft"
    }
}

/// A social platform that accepts single posts.
pub trait PostClient: Send + Sync {
    /// Post `text`, optionally as a reply, and return the new post id.
    fn post(
        &self,
        text: &str,
        reply_to: Option<&str>,
        media: &[PathBuf],
    ) -> Result<String, ProviderError>;
}

/// Posts a thread tweet by tweet, each replying to the previous one.
///
/// Images are attached to the first post. Empty tweets are skipped.
pub struct SequentialPublisher<C> {
    client: C,
    post_delay: Duration,
    name: String,
}

impl<C: PostClient> SequentialPublisher<C> {
    pub fn new(client: C, post_delay: Duration) -> Self {
        Self {
            client,
            post_delay,
            name: "sequential".to_string(),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<C: PostClient> Publisher for SequentialPublisher<C> {
    fn publish(
        &self,
        thread: &Thread,
        title: &str,
        images: &[PathBuf],
    ) -> Result<PublishReceipt, PublishError> {
        let tweets: Vec<&str> = thread
            .texts()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        if tweets.is_empty() {
            return Err(PublishError::EmptyThread);
        }

        let total = tweets.len();
        let mut published: Vec<String> = Vec::with_capacity(total);

        for (i, text) in tweets.into_iter().enumerate() {
            if i > 0 && !self.post_delay.is_zero() {
                std::thread::sleep(self.post_delay);
            }
            let media: &[PathBuf] = if i == 0 { images } else { &[] };
            let reply_to = published.last().map(String::as_str);

            match self.client.post(text, reply_to, media) {
                Ok(id) => {
                    tracing::debug!("Posted {}/{} for '{}': {}", i + 1, total, title, id);
                    published.push(id);
                }
                Err(e) if published.is_empty() => {
                    return Err(PublishError::Post(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(
                        "Thread '{}' stopped after {}/{} posts: {}",
                        title,
                        published.len(),
                        total,
                        e
                    );
                    return Err(PublishError::Partial {
                        published,
                        total,
                        failed_at: i + 1,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Published '{}' as {} posts", title, published.len());
        Ok(PublishReceipt {
            location: published.first().cloned().unwrap_or_default(),
            post_ids: published,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
