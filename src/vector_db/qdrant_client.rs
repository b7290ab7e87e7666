use super::VectorStorePort;
use crate::error::VectorStoreError;
use crate::types::{ChunkPayload, SearchResult, VectorEntry, VectorId};
use anyhow::{Context, Result};
use qdrant_client::qdrant::vectors_config::Config;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder, DeletePointsBuilder,
    Distance, FieldType, Filter, PointId, PointStruct, PointsIdsList, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParams, VectorsConfig,
};
use qdrant_client::{Payload, Qdrant, QdrantError};
use serde_json::json;
use std::collections::HashSet;

const SCROLL_PAGE: u32 = 1000;

/// Vector store backed by a Qdrant collection
///
/// Points are keyed by the UUID form of the [`VectorId`]; the full id, the
/// repository and the serialized chunk payload travel in the point payload.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
}

fn store_error(context: &str, err: QdrantError) -> VectorStoreError {
    VectorStoreError::Transient(format!("{}: {}", context, err))
}

impl QdrantVectorStore {
    /// Connect to a Qdrant server
    pub async fn connect(url: &str, collection: &str) -> Result<Self> {
        tracing::info!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .build()
            .context("Failed to create Qdrant client")?;

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    /// Check if collection exists
    async fn collection_exists(&self) -> Result<bool> {
        let collections = self
            .client
            .list_collections()
            .await
            .context("Failed to list collections")?;

        Ok(collections
            .collections
            .iter()
            .any(|c| c.name == self.collection))
    }

    /// Create the collection and its `repo_id` index if needed
    pub async fn initialize(&self, dimension: usize) -> Result<()> {
        if self.collection_exists().await? {
            tracing::info!("Collection '{}' already exists", self.collection);
            return Ok(());
        }

        tracing::info!(
            "Creating collection '{}' with dimension {}",
            self.collection,
            dimension
        );

        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection).vectors_config(VectorsConfig {
                    config: Some(Config::Params(VectorParams {
                        size: dimension as u64,
                        distance: Distance::Cosine.into(),
                        ..Default::default()
                    })),
                }),
            )
            .await
            .context("Failed to create collection")?;

        self.client
            .create_field_index(CreateFieldIndexCollectionBuilder::new(
                &self.collection,
                "repo_id",
                FieldType::Keyword,
            ))
            .await
            .context("Failed to index repo_id")?;

        Ok(())
    }

    fn point(entry: VectorEntry) -> Result<PointStruct, VectorStoreError> {
        let chunk = serde_json::to_string(&entry.payload)
            .map_err(|e| VectorStoreError::Permanent(format!("Invalid payload: {}", e)))?;
        let payload: Payload = json!({
            "vector_id": entry.id.as_str(),
            "repo_id": entry.payload.repo_id,
            "file_path": entry.payload.file_path,
            "chunk": chunk,
        })
        .try_into()
        .map_err(|e| VectorStoreError::Permanent(format!("Invalid payload: {}", e)))?;

        Ok(PointStruct::new(
            entry.id.to_uuid_string(),
            entry.vector,
            payload,
        ))
    }

    fn repo_filter(repo_id: &str) -> Filter {
        Filter::must([Condition::matches("repo_id", repo_id.to_string())])
    }
}

#[async_trait::async_trait]
impl VectorStorePort for QdrantVectorStore {
    async fn upsert(&self, entries: Vec<VectorEntry>) -> Result<(), VectorStoreError> {
        if entries.is_empty() {
            return Ok(());
        }

        tracing::debug!("Upserting {} points", entries.len());
        let points = entries
            .into_iter()
            .map(Self::point)
            .collect::<Result<Vec<_>, _>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| store_error("Failed to upsert points", e))?;

        Ok(())
    }

    async fn delete(&self, ids: &[VectorId]) -> Result<(), VectorStoreError> {
        if ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<PointId> = ids.iter().map(|id| id.to_uuid_string().into()).collect();
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids })
                    .wait(true),
            )
            .await
            .map_err(|e| store_error("Failed to delete points", e))?;

        Ok(())
    }

    async fn list_ids(&self, repo_id: &str) -> Result<HashSet<VectorId>, VectorStoreError> {
        let mut ids = HashSet::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut request = ScrollPointsBuilder::new(&self.collection)
                .filter(Self::repo_filter(repo_id))
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(offset) = offset.take() {
                request = request.offset(offset);
            }

            let page = self
                .client
                .scroll(request)
                .await
                .map_err(|e| store_error("Failed to scroll points", e))?;

            for point in page.result {
                if let Some(id) = point.payload.get("vector_id").and_then(|v| v.as_str()) {
                    ids.insert(VectorId::from_hex(id.to_string()));
                }
            }

            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(ids)
    }

    async fn search(
        &self,
        repo_id: Option<&str>,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        let mut request = SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
            .with_payload(true);
        if let Some(repo_id) = repo_id {
            request = request.filter(Self::repo_filter(repo_id));
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| store_error("Failed to search points", e))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                let id = point.payload.get("vector_id")?.as_str()?.to_string();
                let chunk = point.payload.get("chunk")?.as_str()?;
                let payload: ChunkPayload = serde_json::from_str(chunk).ok()?;
                Some(SearchResult {
                    id: VectorId::from_hex(id),
                    score: point.score,
                    payload,
                })
            })
            .collect())
    }
}
