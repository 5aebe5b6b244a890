
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::database::IndexedDocument;
use crate::indexer::KnowledgeBase;
use crate::{KbError, Result};

/// One search hit with its chunk text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub distance: f32,
    pub source_doc_name: String,
    pub text: String,
}

/// Context assembled for a prompt, with the documents it came from
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievedContext {
    /// Chunk texts joined by the separator, within the character budget
    pub context: String,
    /// Documents behind `context`, deduplicated, in rank order
    pub sources: Vec<IndexedDocument>,
    /// The chunks that made it into `context`, nearest first
    pub chunks: Vec<RetrievedChunk>,
}

impl RetrievedContext {
    /// Whether nothing relevant was found
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Answers queries against the live knowledge base snapshot
#[derive(Debug, Clone)]
pub struct Retriever {
    knowledge_base: Arc<KnowledgeBase>,
    config: RetrievalConfig,
}

impl Retriever {
    #[inline]
    pub fn new(knowledge_base: Arc<KnowledgeBase>, config: RetrievalConfig) -> Self {
        Self {
            knowledge_base,
            config,
        }
    }

    #[inline]
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieves with the configured `top_k`
    #[inline]
    pub async fn retrieve_default(&self, query: &str) -> Result<RetrievedContext> {
        self.retrieve(query, self.config.top_k).await
    }

    /// Finds the `k` chunks nearest to `query` and assembles them into a context block.
    ///
    /// Fails with [`KbError::KnowledgeBaseNotReady`] when no snapshot is live, so
    /// callers can tell "nothing relevant" from "nothing to search", and with
    /// [`KbError::RebuildRequired`] when the snapshot was embedded by another model.
    #[inline]
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievedContext> {
        if k == 0 {
            return Err(KbError::InvalidArgument(
                "k must be greater than zero".to_string(),
            ));
        }

        let snapshot = self
            .knowledge_base
            .snapshot()
            .ok_or_else(|| self.knowledge_base.not_ready())?;

        if snapshot.index().is_empty() {
            debug!("Knowledge base is empty, nothing to retrieve");
            return Ok(RetrievedContext::default());
        }

        let embedder = self.knowledge_base.embedder();
        let model_name = embedder.model_name().await?;
        let built_with = &snapshot.manifest().embedding_model;
        if *built_with != model_name {
            return Err(KbError::RebuildRequired(format!(
                "knowledge base was built with {} but the embedding model is {}",
                built_with, model_name
            )));
        }

        let query_vector = embedder.encode_one(query).await?;
        let neighbors = snapshot.index().search(&query_vector, k)?;

        let mut hits = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let record = snapshot.record(neighbor.slot).ok_or_else(|| {
                KbError::IndexCorrupt(format!("no metadata for slot {}", neighbor.slot))
            })?;
            hits.push((neighbor.distance, record));
        }

        let mut context = String::new();
        let mut used = 0;
        let mut chunks = Vec::new();
        let mut sources_of_chunks = Vec::new();
        let separator_len = self.config.separator.chars().count();

        for (distance, record) in hits {
            let text_len = record.chunk_text.chars().count();
            let joiner_len = if chunks.is_empty() { 0 } else { separator_len };

            let text = if used + joiner_len + text_len <= self.config.max_context_chars {
                record.chunk_text.clone()
            } else if chunks.is_empty() {
                // A single oversized chunk is cut at the budget rather than dropped
                record
                    .chunk_text
                    .chars()
                    .take(self.config.max_context_chars)
                    .collect()
            } else {
                debug!(
                    "Context budget of {} chars reached, dropping remaining chunks",
                    self.config.max_context_chars
                );
                break;
            };

            if !chunks.is_empty() {
                context.push_str(&self.config.separator);
            }
            used += joiner_len + text.chars().count();
            context.push_str(&text);
            sources_of_chunks.push(record);
            chunks.push(RetrievedChunk {
                chunk_id: record.chunk_id.clone(),
                distance,
                source_doc_name: record.source_doc_name.clone(),
                text,
            });
        }

        let sources = sources_of_chunks
            .into_iter()
            .unique_by(|record| &record.source_doc_id)
            .map(IndexedDocument::from)
            .collect_vec();

        debug!(
            "Retrieved {} chunks ({} chars) from {} documents",
            chunks.len(),
            used,
            sources.len()
        );

        Ok(RetrievedContext {
            context,
            sources,
            chunks,
        })
    }
}
