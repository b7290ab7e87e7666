//! Content-addressed chunk identity
//!
//! Identical `(repo_id, file_path, content)` always hashes to the same
//! [`VectorId`]; cosmetic whitespace changes do not.

use crate::types::VectorId;
use sha2::{Digest, Sha256};

/// Stateless SHA-256 based hasher for chunk identities
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// Derive the vector id for a piece of content
    pub fn hash(repo_id: &str, file_path: &str, content: &str) -> VectorId {
        let content_hash = Self::content_hash(repo_id, file_path, content);
        Self::vector_id(repo_id, file_path, &content_hash)
    }

    /// Digest of the normalized content, bound to its repository and path
    pub fn content_hash(repo_id: &str, file_path: &str, content: &str) -> String {
        let normalized = normalize(content);
        digest_fields(&[repo_id, file_path, &normalized])
    }

    /// Vector id from an already computed content hash
    pub fn vector_id(repo_id: &str, file_path: &str, content_hash: &str) -> VectorId {
        VectorId::from_hex(digest_fields(&[repo_id, file_path, content_hash]))
    }
}

/// Strip trailing whitespace on every line and collapse runs of blank lines
/// into a single blank line
pub fn normalize(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut previous_blank = false;
    let mut first = true;

    for line in content.lines() {
        let line = line.trim_end();
        let blank = line.is_empty();
        if blank && previous_blank {
            continue;
        }
        if !first {
            out.push('\n');
        }
        out.push_str(line);
        previous_blank = blank;
        first = false;
    }

    out
}

// Fields are length-prefixed so ("ab", "c") and ("a", "bc") never collide.
fn digest_fields(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
