//! # CodeScope
//!
//! A local, incremental code-intelligence engine: it ingests a source tree,
//! produces structured code chunks with semantic embeddings, and answers
//! semantic-similarity queries over them without re-processing unchanged
//! inputs.
//!
//! ## Architecture
//!
//! The crate is organized following Domain-Driven Design principles:
//!
//! - `domain`: Core models, hashing, error taxonomy, cancellation context
//! - `application`: Port traits, use cases and the `ProjectIndex` facade
//! - `connector`: External integrations (DuckDB storage, tree-sitter
//!   parsing, path filtering, embeddings)

pub mod application;
pub mod connector;
pub mod domain;

// Re-export commonly used types
pub use application::*;
pub use connector::*;
pub use domain::*;
