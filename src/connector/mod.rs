//! # Connector Layer
//!
//! Adapters implementing the application ports:
//! - Path filtering and traversal (`ignore` + `globset`)
//! - Parsing (tree-sitter, regex declarations, text sections)
//! - Storage (DuckDB vector/relationship stores, JSON metadata)
//! - Embedding (deterministic local model behind an LRU cache)

pub mod embedding;
pub mod parser;
pub mod path_filter;
pub mod storage;

pub use embedding::*;
pub use parser::*;
pub use path_filter::*;
pub use storage::*;
