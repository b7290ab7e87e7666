//! Language detection, AST parsing and chunking of source files
//!
//! Files are cut around top-level declarations found with tree-sitter;
//! oversized declarations are split into line windows and small neighbours
//! are merged, so every chunk is a retrievable unit of reasonable size.

mod ast_parser;
mod chunker;
mod language;

pub use ast_parser::{AstParser, Declaration, ParseFailure};
pub use chunker::CodeChunker;
pub use language::{DeclKind, Language};
