pub mod knowledge_base;


use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::crawler::{CrawlOutcome, DocumentCrawler, SkippedDocument};
use crate::database::{ChunkRecord, IndexedDocument, KnowledgeSnapshot, VectorIndex};
use crate::embeddings::chunking::{ChunkingConfig, chunk_document};
use crate::{KbError, Result};

pub use knowledge_base::{KnowledgeBase, KnowledgeBaseState, KnowledgeBaseStatus};

/// Outcome of a successful rebuild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    pub indexed_chunk_count: usize,
    pub document_count: usize,
    pub skipped: Vec<SkippedDocument>,
    pub duration: Duration,
}

/// Rebuilds the knowledge base from the document library.
///
/// Every rebuild is a full replace: documents are crawled and chunked afresh,
/// all chunks are embedded, and the new snapshot is persisted and only then
/// published. Rebuilds never overlap.
#[derive(Debug)]
pub struct KnowledgeBaseManager {
    knowledge_base: Arc<KnowledgeBase>,
    crawler: DocumentCrawler,
    chunking: ChunkingConfig,
}

impl KnowledgeBaseManager {
    #[inline]
    pub fn new(
        knowledge_base: Arc<KnowledgeBase>,
        crawler: DocumentCrawler,
        chunking: ChunkingConfig,
    ) -> Result<Self> {
        chunking.validate()?;
        Ok(Self {
            knowledge_base,
            crawler,
            chunking,
        })
    }

    #[inline]
    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge_base
    }

    /// Runs a full rebuild, waiting for any rebuild already in progress
    #[inline]
    pub async fn rebuild(&self) -> Result<RebuildReport> {
        let _guard = self.knowledge_base.lock_lifecycle().await;
        self.rebuild_locked().await
    }

    /// Like [`KnowledgeBaseManager::rebuild`] but fails with
    /// [`KbError::RebuildInProgress`] instead of waiting
    #[inline]
    pub async fn try_rebuild(&self) -> Result<RebuildReport> {
        let _guard = self.knowledge_base.try_lock_lifecycle()?;
        self.rebuild_locked().await
    }

    #[inline]
    pub async fn ensure_loaded(&self) -> Result<()> {
        self.knowledge_base.ensure_loaded().await
    }

    /// Source documents of the knowledge base, loading it from disk if needed
    #[inline]
    pub async fn list_documents_indexed(&self) -> Result<Vec<IndexedDocument>> {
        self.ensure_loaded().await?;
        self.knowledge_base.list_documents_indexed()
    }

    async fn rebuild_locked(&self) -> Result<RebuildReport> {
        let kb = &self.knowledge_base;
        let previous_state = kb.state();
        let had_snapshot = kb.snapshot().is_some();

        info!("Starting knowledge base rebuild");
        kb.set_state(KnowledgeBaseState::Rebuilding);

        match self.build_and_persist().await {
            Ok((snapshot, report)) => {
                kb.publish(snapshot);
                info!(
                    "Rebuild complete: {} chunks from {} documents ({} skipped) in {:?}",
                    report.indexed_chunk_count,
                    report.document_count,
                    report.skipped.len(),
                    report.duration
                );
                Ok(report)
            }
            Err(e) => {
                warn!("Rebuild failed: {}", e);
                if had_snapshot {
                    // The previous snapshot is still live and intact
                    kb.record_error(&e);
                    kb.set_state(KnowledgeBaseState::Ready);
                } else if matches!(e, KbError::NoContent(_)) {
                    kb.record_error(&e);
                    kb.set_state(previous_state);
                } else {
                    kb.fail(&e);
                }
                Err(e)
            }
        }
    }

    async fn build_and_persist(&self) -> Result<(Arc<KnowledgeSnapshot>, RebuildReport)> {
        let start_time = Instant::now();

        let CrawlOutcome {
            documents, skipped, ..
        } = self.crawler.crawl().await?;

        if documents.is_empty() {
            return Err(KbError::NoContent(format!(
                "no document text could be extracted ({} documents skipped)",
                skipped.len()
            )));
        }

        let mut records = Vec::new();
        for extracted in &documents {
            let document = &extracted.document;
            let chunks = chunk_document(&document.id, &extracted.text, self.chunking)?;
            records.extend(chunks.into_iter().map(|chunk| ChunkRecord {
                source_doc_id: document.id.clone(),
                source_doc_name: document.name.clone(),
                source_doc_path: document.path.clone(),
                source_url: document.source_url.clone(),
                chunk_text: chunk.text,
                chunk_id: chunk.chunk_id,
            }));
        }

        if records.is_empty() {
            return Err(KbError::NoContent(
                "extracted documents produced no chunks".to_string(),
            ));
        }

        let texts: Vec<String> = records.iter().map(|r| r.chunk_text.clone()).collect();
        let embedder = self.knowledge_base.embedder();

        let bar = if console::user_attended_stderr() {
            let bar = ProgressBar::new_spinner().with_style(
                ProgressStyle::with_template("{spinner} {elapsed} {msg}")
                    .expect("style template is valid"),
            );
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        } else {
            ProgressBar::hidden()
        };
        bar.set_message(format!("Embedding {} chunks", texts.len()));
        let vectors = embedder.encode(&texts).await;
        bar.finish_and_clear();
        let vectors = vectors?;
        debug!("Embedded {} chunks", vectors.len());

        let index = VectorIndex::build(vectors)?;
        let snapshot = Arc::new(KnowledgeSnapshot::new(
            index,
            records,
            embedder.model_name().await?,
        )?);

        let store = self.knowledge_base.store().clone();
        let to_save = Arc::clone(&snapshot);
        tokio::task::spawn_blocking(move || store.save(&to_save))
            .await
            .map_err(|e| KbError::Other(anyhow::anyhow!("persist task failed: {}", e)))??;

        let report = RebuildReport {
            indexed_chunk_count: snapshot.manifest().chunk_count,
            document_count: documents.len(),
            skipped,
            duration: start_time.elapsed(),
        };
        Ok((snapshot, report))
    }
}
