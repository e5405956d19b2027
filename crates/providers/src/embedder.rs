//! Embeddings backed by a provider's embedding endpoint.

use async_trait::async_trait;
use std::sync::Arc;
use taskloop_core::error::MemoryError;
use taskloop_core::memory::Embedder;
use taskloop_core::provider::{EmbeddingRequest, Provider};

/// Adapts [`Provider::embed`] to the [`Embedder`] seam used by memory.
///
/// Any provider failure surfaces as [`MemoryError::Unavailable`].
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    label: String,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        let model = model.into();
        let label = format!("{}:{}", provider.name(), model);
        Self {
            provider,
            model,
            label,
        }
    }
}

#[async_trait]
impl Embedder for ProviderEmbedder {
    fn name(&self) -> &str {
        &self.label
    }

    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: inputs.to_vec(),
            })
            .await
            .map_err(|e| MemoryError::Unavailable(e.to_string()))?;

        if response.embeddings.len() != inputs.len() {
            return Err(MemoryError::Unavailable(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                response.embeddings.len()
            )));
        }

        Ok(response.embeddings)
    }
}
