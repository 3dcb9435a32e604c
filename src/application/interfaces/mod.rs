mod embedding_service;
mod metadata_store;
mod parser_service;
mod progress;
mod relationship_store;
mod vector_store;

pub use embedding_service::*;
pub use metadata_store::*;
pub use parser_service::*;
pub use progress::*;
pub use relationship_store::*;
pub use vector_store::*;
