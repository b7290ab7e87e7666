/// Centralized platform-specific path computation
///
/// Provides consistent path handling across Windows, macOS, and Linux following
/// XDG Base Directory specification on Unix-like systems.
use std::path::PathBuf;

const PROJECT_DIR: &str = "rag-ingest";

/// Platform-agnostic path utilities
pub struct PlatformPaths;

impl PlatformPaths {
    /// Get the appropriate data directory for the current platform
    ///
    /// - Windows: %LOCALAPPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_DATA_HOME or ~/.local/share
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get the appropriate config directory for the current platform
    ///
    /// - Windows: %APPDATA%
    /// - macOS: ~/Library/Application Support
    /// - Linux/Unix: $XDG_CONFIG_HOME or ~/.config
    pub fn config_dir() -> PathBuf {
        dirs::config_dir().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Get default project-specific data directory
    ///
    /// Returns: {data_dir}/rag-ingest
    pub fn project_data_dir() -> PathBuf {
        Self::data_dir().join(PROJECT_DIR)
    }

    /// Get default project-specific config directory
    ///
    /// Returns: {config_dir}/rag-ingest
    pub fn project_config_dir() -> PathBuf {
        Self::config_dir().join(PROJECT_DIR)
    }

    /// Get default snapshot path for the in-memory vector store
    ///
    /// Returns: {data_dir}/rag-ingest/vectors.json
    pub fn default_snapshot_path() -> PathBuf {
        Self::project_data_dir().join("vectors.json")
    }

    /// Get default config file path
    ///
    /// Returns: {config_dir}/rag-ingest/config.toml
    pub fn default_config_path() -> PathBuf {
        Self::project_config_dir().join("config.toml")
    }
}
