//! Working-directory repository adapter

use super::{FileFilter, RepositoryPort};
use crate::config::RepositoryConfig;
use crate::error::{ConfigError, RepositoryError};
use crate::types::SourceFile;
use async_trait::async_trait;
use ignore::WalkBuilder;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Serves repositories from directories on the local file system
///
/// The working tree is the snapshot, so `commit_ref` is recorded by the
/// pipeline but does not select content here.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    roots: HashMap<String, PathBuf>,
    filter: FileFilter,
}

impl LocalRepository {
    pub fn new(config: &RepositoryConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            roots: HashMap::new(),
            filter: FileFilter::new(config)?,
        })
    }

    /// Register the directory that backs `repo_id`
    pub fn with_root(mut self, repo_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(repo_id.into(), root.into());
        self
    }

    fn root(&self, repo_id: &str) -> Result<&PathBuf, RepositoryError> {
        let root = self
            .roots
            .get(repo_id)
            .ok_or_else(|| RepositoryError::NotFound(repo_id.to_string()))?;
        if !root.is_dir() {
            return Err(RepositoryError::NotFound(repo_id.to_string()));
        }
        Ok(root)
    }
}

/// An I/O failure while reading the snapshot. Permission problems will not
/// go away on retry; anything else might.
fn unreadable(repo_id: &str, what: String, err: Option<&io::Error>) -> RepositoryError {
    RepositoryError::Unavailable {
        repo_id: repo_id.to_string(),
        reason: what,
        transient: err.is_none_or(|e| e.kind() != io::ErrorKind::PermissionDenied),
    }
}

/// Walk `root` respecting ignore files, returning accepted files sorted by path
fn walk(
    root: &Path,
    repo_id: &str,
    filter: &FileFilter,
) -> Result<Vec<SourceFile>, RepositoryError> {
    walk_with(root, repo_id, filter, |path| fs::read(path))
}

/// [`walk`] with the file reader supplied by the caller. Files the filter
/// rejects are skipped; any file or directory that cannot be read fails
/// the whole walk, so a partial snapshot is never returned.
fn walk_with<R>(
    root: &Path,
    repo_id: &str,
    filter: &FileFilter,
    read: R,
) -> Result<Vec<SourceFile>, RepositoryError>
where
    R: Fn(&Path) -> io::Result<Vec<u8>>,
{
    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .standard_filters(true) // Respect .gitignore, .ignore, etc.
        .hidden(false) // Don't skip hidden files by default
        .require_git(false) // Don't require a .git directory
        .build();

    for entry in walker {
        let entry = entry.map_err(|e| {
            unreadable(
                repo_id,
                format!("cannot walk {}: {}", root.display(), e),
                e.io_error(),
            )
        })?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if !filter.accepts_path(&relative) {
            continue;
        }

        if let Ok(metadata) = entry.metadata()
            && !filter.accepts_size(metadata.len())
        {
            tracing::debug!("Skipping large file: {}", relative);
            continue;
        }

        let bytes = read(path).map_err(|e| {
            unreadable(repo_id, format!("cannot read {}: {}", relative, e), Some(&e))
        })?;

        match filter.decode(bytes) {
            Some(content) => files.push(SourceFile::new(relative, content)),
            None => tracing::debug!("Skipping binary or non-UTF-8 file: {}", relative),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[async_trait]
impl RepositoryPort for LocalRepository {
    async fn fetch_files(
        &self,
        repo_id: &str,
        commit_ref: &str,
    ) -> Result<Vec<SourceFile>, RepositoryError> {
        let root = self.root(repo_id)?.clone();
        let filter = self.filter.clone();

        tracing::debug!(
            "Walking {} for {}@{}",
            root.display(),
            repo_id,
            commit_ref
        );

        let owned_id = repo_id.to_string();
        let files = tokio::task::spawn_blocking(move || walk(&root, &owned_id, &filter))
            .await
            .map_err(|e| RepositoryError::Unavailable {
                repo_id: repo_id.to_string(),
                reason: format!("walk task failed: {}", e),
                transient: true,
            })??;

        tracing::info!("Found {} files in {}", files.len(), repo_id);
        Ok(files)
    }
}
