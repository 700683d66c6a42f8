//! Retrieval side of the pipeline.
//!
//! - `Chunker`: splits extracted text into overlapping chunks
//! - `VectorIndex`: document-scoped embedding storage and cosine search
//! - `SqliteVectorIndex`: the in-process implementation

mod chunker;
mod sqlite;
mod store;

pub use chunker::{Chunker, ChunkerConfig, DocumentChunk};
pub use sqlite::SqliteVectorIndex;
pub use store::{ChunkMatch, ChunkRecord, VectorIndex};
