use super::EmbeddingPort;
use crate::error::EmbeddingServiceError;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// Embedding adapter running a local FastEmbed model on the blocking pool
pub struct FastEmbedEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
    model_name: String,
}

/// Map a configured model name to a FastEmbed model and its dimension
pub(crate) fn resolve_model(name: &str) -> Result<(EmbeddingModel, usize)> {
    let resolved = match name {
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            (EmbeddingModel::AllMiniLML6V2, 384)
        }
        "all-MiniLM-L12-v2" | "sentence-transformers/all-MiniLM-L12-v2" => {
            (EmbeddingModel::AllMiniLML12V2, 384)
        }
        "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => (EmbeddingModel::BGESmallENV15, 384),
        "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => (EmbeddingModel::BGEBaseENV15, 768),
        other => bail!("Unsupported embedding model: {}", other),
    };
    Ok(resolved)
}

/// Vector dimension of a configured model, without loading it
pub fn model_dimension(name: &str) -> Result<usize> {
    resolve_model(name).map(|(_, dimension)| dimension)
}

impl FastEmbedEmbedder {
    /// Create an embedder with the default model (all-MiniLM-L6-v2)
    pub fn new() -> Result<Self> {
        Self::with_model_name("all-MiniLM-L6-v2")
    }

    /// Create an embedder for a configured model name
    pub fn with_model_name(name: &str) -> Result<Self> {
        let (model, dimension) = resolve_model(name)?;
        tracing::info!("Initializing FastEmbed model: {:?}", model);

        let mut options = InitOptions::default();
        options.model_name = model;
        options.show_download_progress = true;

        let embedding_model =
            TextEmbedding::try_new(options).context("Failed to initialize FastEmbed model")?;

        Ok(Self {
            model: Arc::new(Mutex::new(embedding_model)),
            dimension,
            model_name: name.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[async_trait]
impl EmbeddingPort for FastEmbedEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingServiceError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| EmbeddingServiceError::Permanent("model lock poisoned".to_string()))?;
            model
                .embed(texts, None)
                .map_err(|e| EmbeddingServiceError::Permanent(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingServiceError::Transient(format!("embedding task failed: {}", e)))?
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
