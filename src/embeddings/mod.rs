pub mod chunking;
pub mod embedder;
pub mod ollama;

pub use chunking::{Chunk, ChunkingConfig, SlidingWindow, chunk_document, chunk_text};
pub use embedder::{Embedder, EmbeddingModel, ModelLoader};
pub use ollama::{OllamaClient, OllamaEmbeddingModel, OllamaModelLoader};
