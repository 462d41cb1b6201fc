//! Threads: ordered sequences of post-sized text units.

use serde::{Deserialize, Serialize};

/// One post of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    pub tweet: String,
}

impl Tweet {
    pub fn new(text: impl Into<String>) -> Self {
        Self { tweet: text.into() }
    }
}

/// An ordered, non-empty sequence of tweets.
///
/// Persisted as a plain JSON array of `{"tweet": "..."}` objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Thread(pub Vec<Tweet>);

impl Thread {
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(texts.into_iter().map(Tweet::new).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tweet> {
        self.0.iter()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|t| t.tweet.as_str())
    }
}

impl<'a> IntoIterator for &'a Thread {
    type Item = &'a Tweet;
    type IntoIter = std::slice::Iter<'a, Tweet>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
