//! Embedding port, FastEmbed adapter and the batcher that drives them

mod batcher;
mod fastembed_manager;

pub use batcher::{BatchFailure, EmbeddingBatcher, EmbeddingOutcome, estimate_tokens};
pub use fastembed_manager::{FastEmbedEmbedder, model_dimension};

use crate::error::EmbeddingServiceError;
use async_trait::async_trait;

/// Capability of turning text into fixed-length vectors
#[async_trait]
pub trait EmbeddingPort: Send + Sync {
    /// Embed a batch of texts. The returned vectors are aligned positionally
    /// with the input.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingServiceError>;

    /// Get the dimension of the embeddings
    fn dimension(&self) -> usize;
}
