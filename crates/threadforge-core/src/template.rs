//! Image-style templates from the prompt catalog.

use serde::{Deserialize, Serialize};

/// A catalogued image-prompt skeleton.
///
/// Read-only once the catalog is loaded; shared across worker threads without locking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    /// Unique key within the catalog, e.g. `"87"`.
    pub case_number: String,
    pub title: String,
    /// Raw prompt text: style and layout instructions.
    pub prompt: String,
    /// Derived match keywords for the keyword-scoring fallback, in first-seen order.
    pub keywords: Vec<String>,
}
