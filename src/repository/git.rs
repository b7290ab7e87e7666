//! Git repository adapter: reads the tree of a commit without checking it out

use super::{FileFilter, RepositoryPort};
use crate::config::RepositoryConfig;
use crate::error::{ConfigError, RepositoryError};
use crate::types::SourceFile;
use async_trait::async_trait;
use git2::{ObjectType, Repository, TreeWalkMode, TreeWalkResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Serves repositories from local git repositories, at any commit reference
/// (branch, tag, sha or `HEAD`)
#[derive(Debug, Clone)]
pub struct GitRepository {
    roots: HashMap<String, PathBuf>,
    filter: FileFilter,
}

impl GitRepository {
    pub fn new(config: &RepositoryConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            roots: HashMap::new(),
            filter: FileFilter::new(config)?,
        })
    }

    /// Register the git repository that backs `repo_id`
    pub fn with_root(mut self, repo_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.roots.insert(repo_id.into(), path.into());
        self
    }
}

fn read_tree(
    path: &Path,
    repo_id: &str,
    commit_ref: &str,
    filter: &FileFilter,
) -> Result<Vec<SourceFile>, RepositoryError> {
    let repo =
        Repository::open(path).map_err(|_| RepositoryError::NotFound(repo_id.to_string()))?;

    let tree = repo
        .revparse_single(commit_ref)
        .and_then(|object| object.peel_to_tree())
        .map_err(|_| RepositoryError::RefNotFound {
            repo_id: repo_id.to_string(),
            reference: commit_ref.to_string(),
        })?;

    let mut files = Vec::new();
    let mut failure = None;

    tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
        if entry.kind() != Some(ObjectType::Blob) {
            return TreeWalkResult::Ok;
        }
        let Some(name) = entry.name() else {
            return TreeWalkResult::Ok;
        };
        let relative = format!("{}{}", dir, name);
        if !filter.accepts_path(&relative) {
            return TreeWalkResult::Ok;
        }

        let blob = match repo.find_blob(entry.id()) {
            Ok(blob) => blob,
            Err(e) => {
                failure = Some(e);
                return TreeWalkResult::Abort;
            }
        };
        if !filter.accepts_size(blob.size() as u64) {
            tracing::debug!("Skipping large file: {}", relative);
            return TreeWalkResult::Ok;
        }

        match filter.decode(blob.content().to_vec()) {
            Some(content) => files.push(SourceFile::new(relative, content)),
            None => tracing::debug!("Skipping binary or non-UTF-8 file: {}", relative),
        }
        TreeWalkResult::Ok
    })
    .map_err(|e| unavailable(repo_id, e))?;

    if let Some(e) = failure {
        return Err(unavailable(repo_id, e));
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn unavailable(repo_id: &str, err: git2::Error) -> RepositoryError {
    RepositoryError::Unavailable {
        repo_id: repo_id.to_string(),
        reason: err.message().to_string(),
        transient: false,
    }
}

#[async_trait]
impl RepositoryPort for GitRepository {
    async fn fetch_files(
        &self,
        repo_id: &str,
        commit_ref: &str,
    ) -> Result<Vec<SourceFile>, RepositoryError> {
        let path = self
            .roots
            .get(repo_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(repo_id.to_string()))?;
        let filter = self.filter.clone();
        let owned_repo = repo_id.to_string();
        let owned_ref = commit_ref.to_string();

        let files = tokio::task::spawn_blocking(move || {
            read_tree(&path, &owned_repo, &owned_ref, &filter)
        })
        .await
        .map_err(|e| RepositoryError::Unavailable {
            repo_id: repo_id.to_string(),
            reason: format!("git task failed: {}", e),
            transient: true,
        })??;

        tracing::info!(
            "Read {} files from {}@{}",
            files.len(),
            repo_id,
            commit_ref
        );
        Ok(files)
    }
}
