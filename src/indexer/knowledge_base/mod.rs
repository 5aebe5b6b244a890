#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::database::{IndexedDocument, KnowledgeBaseStore, KnowledgeSnapshot};
use crate::embeddings::Embedder;
use crate::{KbError, Result};

/// Lifecycle of the knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeBaseState {
    Unloaded,
    Loading,
    Ready,
    Rebuilding,
    Failed,
}

impl fmt::Display for KnowledgeBaseState {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Rebuilding => "rebuilding",
            Self::Failed => "failed",
        })
    }
}

/// Point-in-time view of the knowledge base for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeBaseStatus {
    pub state: KnowledgeBaseState,
    pub chunk_count: usize,
    pub document_count: usize,
    pub dimension: usize,
    pub built_at: Option<DateTime<Utc>>,
    pub embedding_model: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    state: KnowledgeBaseState,
    snapshot: Option<Arc<KnowledgeSnapshot>>,
    last_error: Option<String>,
}

/// The shared knowledge base: the live snapshot, its lifecycle state, the
/// on-disk store and the embedding model used to query it.
///
/// Readers take an `Arc` of the current snapshot and never block writers. A new
/// snapshot replaces the old one with a single pointer swap, so queries see
/// either the old knowledge base or the new one, never a mix.
pub struct KnowledgeBase {
    store: KnowledgeBaseStore,
    embedder: Arc<Embedder>,
    inner: RwLock<Inner>,
    /// Held for the whole of a rebuild or a load from disk
    lifecycle: Mutex<()>,
}

impl fmt::Debug for KnowledgeBase {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("store", &self.store)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl KnowledgeBase {
    #[inline]
    pub fn new(store: KnowledgeBaseStore, embedder: Arc<Embedder>) -> Self {
        Self {
            store,
            embedder,
            inner: RwLock::new(Inner {
                state: KnowledgeBaseState::Unloaded,
                snapshot: None,
                last_error: None,
            }),
            lifecycle: Mutex::new(()),
        }
    }

    #[inline]
    pub const fn store(&self) -> &KnowledgeBaseStore {
        &self.store
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    #[inline]
    pub fn state(&self) -> KnowledgeBaseState {
        self.read(|inner| inner.state)
    }

    /// The snapshot queries are currently served from
    #[inline]
    pub fn snapshot(&self) -> Option<Arc<KnowledgeSnapshot>> {
        self.read(|inner| inner.snapshot.clone())
    }

    #[inline]
    pub fn status(&self) -> KnowledgeBaseStatus {
        self.read(|inner| {
            let manifest = inner.snapshot.as_ref().map(|s| s.manifest());
            KnowledgeBaseStatus {
                state: inner.state,
                chunk_count: manifest.map_or(0, |m| m.chunk_count),
                document_count: manifest.map_or(0, |m| m.document_count),
                dimension: manifest.map_or(0, |m| m.dimension),
                built_at: manifest.map(|m| m.built_at),
                embedding_model: manifest.map(|m| m.embedding_model.clone()),
                last_error: inner.last_error.clone(),
            }
        })
    }

    /// Distinct source documents of the live snapshot, in first-seen order
    #[inline]
    pub fn list_documents_indexed(&self) -> Result<Vec<IndexedDocument>> {
        self.snapshot()
            .map(|snapshot| snapshot.documents())
            .ok_or_else(|| self.not_ready())
    }

    /// Loads the persisted knowledge base unless one is already live.
    ///
    /// Never crawls: when nothing is persisted the state returns to
    /// [`KnowledgeBaseState::Unloaded`] and [`KbError::RebuildRequired`] is returned.
    #[inline]
    pub async fn ensure_loaded(&self) -> Result<()> {
        if self.snapshot().is_some() {
            return Ok(());
        }

        let _guard = self.lock_lifecycle().await;
        // A rebuild may have published while we waited
        if self.snapshot().is_some() {
            return Ok(());
        }

        self.set_state(KnowledgeBaseState::Loading);
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| KbError::Other(anyhow::anyhow!("load task failed: {}", e)))
            .and_then(|result| result);

        match loaded {
            Ok(snapshot) => {
                info!(
                    "Loaded knowledge base: {} chunks from {} documents",
                    snapshot.manifest().chunk_count,
                    snapshot.manifest().document_count
                );
                self.publish(Arc::new(snapshot));
                Ok(())
            }
            Err(e @ (KbError::RebuildRequired(_) | KbError::IndexCorrupt(_))) => {
                warn!("Knowledge base not loaded: {}", e);
                self.write(|inner| {
                    inner.state = KnowledgeBaseState::Unloaded;
                    inner.last_error = Some(e.to_string());
                });
                Err(e)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    pub(crate) async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    pub(crate) fn try_lock_lifecycle(&self) -> Result<MutexGuard<'_, ()>> {
        self.lifecycle
            .try_lock()
            .map_err(|_| KbError::RebuildInProgress)
    }

    pub(crate) fn set_state(&self, state: KnowledgeBaseState) {
        let previous = self.write(|inner| std::mem::replace(&mut inner.state, state));
        if previous != state {
            info!("Knowledge base state: {} -> {}", previous, state);
        }
    }

    /// Makes `snapshot` the live knowledge base
    pub(crate) fn publish(&self, snapshot: Arc<KnowledgeSnapshot>) {
        self.write(|inner| {
            inner.snapshot = Some(snapshot);
            inner.last_error = None;
        });
        self.set_state(KnowledgeBaseState::Ready);
    }

    pub(crate) fn record_error(&self, error: &KbError) {
        self.write(|inner| inner.last_error = Some(error.to_string()));
    }

    pub(crate) fn fail(&self, error: &KbError) {
        self.record_error(error);
        self.set_state(KnowledgeBaseState::Failed);
    }

    pub(crate) fn not_ready(&self) -> KbError {
        let status = self.status();
        let hint = match status.state {
            KnowledgeBaseState::Unloaded => "nothing loaded yet, load or rebuild it first",
            KnowledgeBaseState::Loading => "it is still loading",
            KnowledgeBaseState::Rebuilding => "the first build is still running",
            KnowledgeBaseState::Failed => "the last load or rebuild failed",
            KnowledgeBaseState::Ready => "no snapshot is published",
        };
        match status.last_error {
            Some(error) => KbError::KnowledgeBaseNotReady(format!("{} ({})", hint, error)),
            None => KbError::KnowledgeBaseNotReady(hint.to_string()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Inner) -> T) -> T {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        f(&mut self.inner.write().unwrap_or_else(PoisonError::into_inner))
    }
}
