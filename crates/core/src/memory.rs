//! Memory trait: named documents with exact and similarity lookup.
//!
//! A MemoryStore holds documents for the duration of a run. Structured
//! lookups match a document name exactly; unstructured lookups embed the
//! query text and rank documents by cosine similarity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;

/// A named piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub name: String,
    pub text: String,
}

impl MemoryDocument {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// A query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub name: String,
    pub text: String,
    /// 1.0 for an exact name match, cosine similarity otherwise.
    pub score: f32,
}

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// A short identifier (e.g., "hashing", "openai:text-embedding-3-small").
    fn name(&self) -> &str;

    /// Embed each input. Failures are reported as [`MemoryError::Unavailable`].
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, MemoryError>;
}

/// The core MemoryStore trait.
///
/// Implementations use interior mutability so a store can be shared
/// between the execution loop and the memory actions of the same run.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or overwrite a document. Idempotent by name.
    async fn add(&self, name: &str, text: &str) -> Result<(), MemoryError>;

    /// Exact lookup when `text` names a document, otherwise the `top_k`
    /// most similar documents (descending score, ties by insertion order).
    /// Never adds or rewrites documents.
    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredDocument>, MemoryError>;

    /// Exact lookup by name.
    async fn get(&self, name: &str) -> Option<MemoryDocument>;

    /// Document names in insertion order.
    async fn names(&self) -> Vec<String>;

    /// All documents in insertion order.
    async fn documents(&self) -> Vec<MemoryDocument> {
        let mut documents = Vec::new();
        for name in self.names().await {
            if let Some(doc) = self.get(&name).await {
                documents.push(doc);
            }
        }
        documents
    }

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
