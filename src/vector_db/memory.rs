use super::{VectorStorePort, cosine_similarity};
use crate::error::VectorStoreError;
use crate::types::{SearchResult, VectorEntry, VectorId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, RwLock};

/// On-disk form of the store
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entries: BTreeMap<VectorId, VectorEntry>,
}

impl Snapshot {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Snapshot file not found, starting with empty store");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read snapshot file")?;
        let snapshot: Snapshot =
            serde_json::from_str(&content).context("Failed to parse snapshot file")?;

        tracing::info!("Loaded snapshot with {} entries", snapshot.entries.len());
        Ok(snapshot)
    }

    /// Write to a temporary sibling file, then rename over the target so
    /// readers never see a half-written snapshot
    fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create snapshot directory")?;
        }

        let content = serde_json::to_vec(self).context("Failed to serialize snapshot")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content).context("Failed to write snapshot file")?;
        fs::rename(&tmp, path).context("Failed to replace snapshot file")?;

        tracing::debug!("Saved snapshot to {:?}", path);
        Ok(())
    }
}

/// Vector store kept in memory, optionally persisted as a JSON snapshot
/// after every mutation
///
/// Saves happen on the blocking pool, one at a time. A save that finds a
/// newer snapshot already written skips itself, so concurrent writers
/// coalesce into fewer saves.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<BTreeMap<VectorId, VectorEntry>>,
    /// Bumped under the write lock on every mutation
    generation: AtomicU64,
    /// Generation of the last snapshot written; held for the whole save
    saved: Mutex<u64>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryVectorStore {
    /// Create an empty store without persistence
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a store backed by a snapshot file, loading it if it exists
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = Snapshot::load(&path)?;
        Ok(Self {
            entries: RwLock::new(snapshot.entries),
            snapshot_path: Some(path),
            ..Default::default()
        })
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn get(&self, id: &VectorId) -> Option<VectorEntry> {
        self.entries.read().await.get(id).cloned()
    }

    /// Every id in the store, across repositories
    pub async fn all_ids(&self) -> HashSet<VectorId> {
        self.entries.read().await.keys().cloned().collect()
    }

    /// Write the current contents to the snapshot file, unless a save of
    /// the same or a later generation has already done so
    async fn persist(&self) -> Result<(), VectorStoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut saved = self.saved.lock().await;
        let (generation, snapshot) = {
            let entries = self.entries.read().await;
            let generation = self.generation.load(Ordering::SeqCst);
            if generation <= *saved {
                return Ok(());
            }
            (
                generation,
                Snapshot {
                    entries: entries.clone(),
                },
            )
        };

        let path = path.clone();
        tokio::task::spawn_blocking(move || snapshot.save(&path))
            .await
            .map_err(|e| VectorStoreError::Transient(format!("snapshot task failed: {}", e)))?
            .map_err(|e| VectorStoreError::Permanent(format!("{:#}", e)))?;

        *saved = generation;
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorStorePort for MemoryVectorStore {
    async fn upsert(&self, entries: Vec<VectorEntry>) -> Result<(), VectorStoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        {
            let mut stored = self.entries.write().await;
            for entry in entries {
                stored.insert(entry.id.clone(), entry);
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.persist().await
    }

    async fn delete(&self, ids: &[VectorId]) -> Result<(), VectorStoreError> {
        {
            let mut stored = self.entries.write().await;
            let before = stored.len();
            for id in ids {
                stored.remove(id);
            }
            if stored.len() == before {
                return Ok(());
            }
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.persist().await
    }

    async fn list_ids(&self, repo_id: &str) -> Result<HashSet<VectorId>, VectorStoreError> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.payload.repo_id == repo_id)
            .map(|entry| entry.id.clone())
            .collect())
    }

    async fn search(
        &self,
        repo_id: Option<&str>,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError> {
        let stored = self.entries.read().await;
        let mut results: Vec<SearchResult> = stored
            .values()
            .filter(|entry| repo_id.is_none_or(|repo| entry.payload.repo_id == repo))
            .map(|entry| SearchResult {
                id: entry.id.clone(),
                score: cosine_similarity(vector, &entry.vector),
                payload: entry.payload.clone(),
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);
        Ok(results)
    }
}
