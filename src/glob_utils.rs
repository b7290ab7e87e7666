//! Glob pattern matching utilities for path filtering

use crate::error::ConfigError;
use globset::{Glob, GlobMatcher};

/// Compile glob patterns into matchers for efficient repeated matching
///
/// `key` names the configuration setting the patterns came from, for error
/// reporting.
pub fn compile_patterns(key: &str, patterns: &[String]) -> Result<Vec<GlobMatcher>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Glob::new(pattern)
                .map(|g| g.compile_matcher())
                .map_err(|e| ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: format!("invalid glob pattern '{}': {}", pattern, e),
                })
        })
        .collect()
}

/// Check if a relative, `/`-separated path matches any of the matchers
///
/// Patterns are also tried against every suffix of the path, so `target/**`
/// matches `crates/core/target/debug/build.rs`. An empty matcher list
/// matches nothing.
pub fn matches_any_matcher(path: &str, matchers: &[GlobMatcher]) -> bool {
    let path = path.trim_start_matches('/');

    matchers.iter().any(|matcher| {
        if matcher.is_match(path) {
            return true;
        }

        let path_parts: Vec<&str> = path.split('/').collect();
        (1..path_parts.len()).any(|i| matcher.is_match(path_parts[i..].join("/")))
    })
}
