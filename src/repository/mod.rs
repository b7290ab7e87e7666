//! Repository collaborators: where the pipeline gets a snapshot of files

mod git;
mod local;

pub use git::GitRepository;
pub use local::LocalRepository;

use crate::config::RepositoryConfig;
use crate::error::{ConfigError, RepositoryError};
use crate::glob_utils::{compile_patterns, matches_any_matcher};
use crate::types::SourceFile;
use async_trait::async_trait;
use globset::GlobMatcher;

/// Capability of producing the current file set of a repository
#[async_trait]
pub trait RepositoryPort: Send + Sync {
    /// Fetch every ingestible file of `repo_id` at `commit_ref`, sorted by path
    async fn fetch_files(
        &self,
        repo_id: &str,
        commit_ref: &str,
    ) -> Result<Vec<SourceFile>, RepositoryError>;
}

/// Path, size and content checks shared by the repository adapters
#[derive(Debug, Clone)]
pub(crate) struct FileFilter {
    include: Vec<GlobMatcher>,
    exclude: Vec<GlobMatcher>,
    max_file_size: usize,
}

impl FileFilter {
    pub(crate) fn new(config: &RepositoryConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            include: compile_patterns("repository.include_patterns", &config.include_patterns)?,
            exclude: compile_patterns("repository.exclude_patterns", &config.exclude_patterns)?,
            max_file_size: config.max_file_size,
        })
    }

    /// Whether a relative path passes the include and exclude patterns
    pub(crate) fn accepts_path(&self, path: &str) -> bool {
        if path.split('/').any(|part| part == ".git") {
            return false;
        }
        if !self.include.is_empty() && !matches_any_matcher(path, &self.include) {
            return false;
        }
        !matches_any_matcher(path, &self.exclude)
    }

    pub(crate) fn accepts_size(&self, size: u64) -> bool {
        size <= self.max_file_size as u64
    }

    /// Decode file bytes as text, rejecting binary and non-UTF-8 content
    pub(crate) fn decode(&self, bytes: Vec<u8>) -> Option<String> {
        if is_binary(&bytes) {
            return None;
        }
        String::from_utf8(bytes).ok()
    }
}

/// Heuristic: a NUL byte, or more than 30% control characters, means binary
pub(crate) fn is_binary(content: &[u8]) -> bool {
    if content.is_empty() {
        return false;
    }
    if content.contains(&0) {
        return true;
    }

    let non_printable = content
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();

    (non_printable as f64 / content.len() as f64) >= 0.3
}
