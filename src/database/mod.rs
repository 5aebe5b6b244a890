// Persistence for the knowledge base: the exact vector index and the
// paired index/metadata artifacts on disk.

pub mod store;
pub mod vector_index;

pub use store::{ChunkRecord, IndexedDocument, KnowledgeBaseStore, KnowledgeSnapshot, Manifest};
pub use vector_index::{Neighbor, VectorIndex};
