//! Run-scoped document store with exact and similarity lookup.

use async_trait::async_trait;
use std::sync::Arc;
use taskloop_core::error::MemoryError;
use taskloop_core::memory::{Embedder, MemoryDocument, MemoryStore, ScoredDocument};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::vector::vector_search;

struct StoredDocument {
    name: String,
    text: String,
    embedding: Option<Vec<f32>>,
}

/// A [`MemoryStore`] that keeps documents in insertion order and ranks
/// them by cosine similarity to an embedding of the query.
///
/// Embeddings are computed on insert. A document whose embedding failed is
/// still stored and reachable by exact name; the next similarity query
/// embeds it before ranking, and fails with `Unavailable` while the
/// embedder is still down.
pub struct VectorMemory {
    embedder: Arc<dyn Embedder>,
    documents: Arc<RwLock<Vec<StoredDocument>>>,
}

impl VectorMemory {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            documents: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn embedder_name(&self) -> &str {
        self.embedder.name()
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut vectors = self.embedder.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| MemoryError::Unavailable("embedder returned no vector".into()))
    }

    /// Embed every stored document that has no vector yet.
    async fn backfill_embeddings(&self) -> Result<(), MemoryError> {
        let pending: Vec<(String, String)> = self
            .documents
            .read()
            .await
            .iter()
            .filter(|d| d.embedding.is_none())
            .map(|d| (d.name.clone(), d.text.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        if vectors.len() != pending.len() {
            return Err(MemoryError::Unavailable(format!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                pending.len()
            )));
        }

        let mut documents = self.documents.write().await;
        for ((name, text), vector) in pending.into_iter().zip(vectors) {
            // Skip documents rewritten while the lock was released
            if let Some(doc) = documents
                .iter_mut()
                .find(|d| d.name == name && d.text == text && d.embedding.is_none())
            {
                doc.embedding = Some(vector);
            }
        }
        debug!(count = texts.len(), "Backfilled document embeddings");
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for VectorMemory {
    async fn add(&self, name: &str, text: &str) -> Result<(), MemoryError> {
        let embedding = match self.embed_one(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(document = name, error = %e, "Storing document without embedding");
                None
            }
        };

        let mut documents = self.documents.write().await;
        if let Some(existing) = documents.iter_mut().find(|d| d.name == name) {
            existing.text = text.to_string();
            existing.embedding = embedding;
        } else {
            documents.push(StoredDocument {
                name: name.to_string(),
                text: text.to_string(),
                embedding,
            });
        }
        debug!(document = name, total = documents.len(), "Document stored");
        Ok(())
    }

    async fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredDocument>, MemoryError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        {
            let documents = self.documents.read().await;
            if let Some(doc) = documents.iter().find(|d| d.name == text) {
                return Ok(vec![ScoredDocument {
                    name: doc.name.clone(),
                    text: doc.text.clone(),
                    score: 1.0,
                }]);
            }
            if documents.is_empty() {
                return Ok(Vec::new());
            }
        }

        // No lock is held across the embedding calls
        self.backfill_embeddings().await?;
        let query_embedding = self.embed_one(text).await?;

        let documents = self.documents.read().await;
        let candidates = documents
            .iter()
            .enumerate()
            .map(|(i, d)| (i, d.embedding.as_deref()));

        Ok(vector_search(candidates, &query_embedding, top_k)
            .into_iter()
            .map(|(i, score)| ScoredDocument {
                name: documents[i].name.clone(),
                text: documents[i].text.clone(),
                score,
            })
            .collect())
    }

    async fn get(&self, name: &str) -> Option<MemoryDocument> {
        self.documents
            .read()
            .await
            .iter()
            .find(|d| d.name == name)
            .map(|d| MemoryDocument::new(&d.name, &d.text))
    }

    async fn names(&self) -> Vec<String> {
        self.documents
            .read()
            .await
            .iter()
            .map(|d| d.name.clone())
            .collect()
    }

    async fn documents(&self) -> Vec<MemoryDocument> {
        self.documents
            .read()
            .await
            .iter()
            .map(|d| MemoryDocument::new(&d.name, &d.text))
            .collect()
    }

    async fn len(&self) -> usize {
        self.documents.read().await.len()
    }
}
