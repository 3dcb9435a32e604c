//! Storage adapters: DuckDB-backed vector and relationship stores, JSON
//! metadata document.

mod duckdb_relationship_store;
mod duckdb_vector_store;
mod json_metadata_store;

pub use duckdb_relationship_store::*;
pub use duckdb_vector_store::*;
pub use json_metadata_store::*;
