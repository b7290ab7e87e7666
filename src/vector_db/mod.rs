// In-memory store with an optional JSON snapshot is the default backend
pub mod memory;
pub use memory::MemoryVectorStore;

// Qdrant is optional (requires external server)
#[cfg(feature = "qdrant-backend")]
pub mod qdrant_client;
#[cfg(feature = "qdrant-backend")]
pub use qdrant_client::QdrantVectorStore;

mod writer;
pub use writer::{VectorIndexWriter, WriteInterrupted};

use crate::error::VectorStoreError;
use crate::types::{SearchResult, VectorEntry, VectorId};
use std::collections::HashSet;

/// Capability of storing vectors keyed by [`VectorId`]
///
/// Upsert and delete are idempotent: writing the same entry twice, or
/// deleting an id that is not present, is not an error.
#[async_trait::async_trait]
pub trait VectorStorePort: Send + Sync {
    /// Insert or replace entries by id
    async fn upsert(&self, entries: Vec<VectorEntry>) -> Result<(), VectorStoreError>;

    /// Remove entries by id
    async fn delete(&self, ids: &[VectorId]) -> Result<(), VectorStoreError>;

    /// Every id currently stored for a repository
    async fn list_ids(&self, repo_id: &str) -> Result<HashSet<VectorId>, VectorStoreError>;

    /// Nearest neighbours of `vector`, optionally restricted to one repository
    async fn search(
        &self,
        _repo_id: Option<&str>,
        _vector: &[f32],
        _limit: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        Err(VectorStoreError::Permanent(
            "search is not supported by this store".to_string(),
        ))
    }
}

/// Cosine similarity of two vectors; 0.0 when either is all zeros or the
/// dimensions differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
