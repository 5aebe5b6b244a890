//! Deterministic stand-ins shared by unit tests

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::crawler::extractor::ExtractorRegistry;
use crate::crawler::{DocumentCrawler, DocumentLibrary, LibraryItem, Page};
use crate::database::KnowledgeBaseStore;
use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::embedder::{Embedder, EmbeddingModel, ModelLoader};
use crate::indexer::{KnowledgeBase, KnowledgeBaseManager};
use crate::{KbError, Result};

pub const VOCABULARY: [&str; 7] = ["cat", "dog", "mammal", "are", "what", "is", "a"];

/// Bag-of-words model over a fixed vocabulary. A trailing plural `s` is ignored.
#[derive(Debug, Default)]
pub struct KeywordModel {
    pub calls: AtomicUsize,
}

impl KeywordModel {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; VOCABULARY.len()];
        for word in text.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            let stem = word.strip_suffix('s').filter(|s| !s.is_empty());
            if let Some(position) = VOCABULARY
                .iter()
                .position(|v| *v == word || Some(*v) == stem)
            {
                vector[position] += 1.0;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingModel for KeywordModel {
    fn name(&self) -> &str {
        "keyword-test-model"
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Loader that fails a fixed number of times before handing out a [`KeywordModel`]
#[derive(Debug, Default)]
pub struct FlakyLoader {
    pub failures_left: AtomicUsize,
    pub loads: AtomicUsize,
}

impl FlakyLoader {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            loads: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelLoader for FlakyLoader {
    async fn load(&self) -> Result<Arc<dyn EmbeddingModel>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(KbError::Network("model host unreachable".to_string()));
        }
        Ok(Arc::new(KeywordModel::default()))
    }
}

/// Flat in-memory document library whose files can be swapped between crawls
#[derive(Debug, Default)]
pub struct MemoryLibrary {
    files: Mutex<Vec<(String, Vec<u8>)>>,
    auth_rejected: AtomicBool,
}

impl MemoryLibrary {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let library = Self::default();
        library.set_files(files);
        library
    }

    pub fn set_files(&self, files: &[(&str, &str)]) {
        *self.files.lock().expect("lock") = files
            .iter()
            .map(|(name, text)| ((*name).to_string(), text.as_bytes().to_vec()))
            .collect();
    }

    pub fn reject_auth(&self, rejected: bool) {
        self.auth_rejected.store(rejected, Ordering::SeqCst);
    }

    fn check_auth(&self) -> Result<()> {
        if self.auth_rejected.load(Ordering::SeqCst) {
            return Err(KbError::AuthFailure("HTTP 401".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentLibrary for MemoryLibrary {
    async fn root_folder(&self) -> Result<String> {
        self.check_auth()?;
        Ok("root".to_string())
    }

    async fn enumerate_children(&self, _folder_id: &str, _page_link: Option<&str>) -> Result<Page> {
        self.check_auth()?;
        let items = self
            .files
            .lock()
            .expect("lock")
            .iter()
            .map(|(name, _)| LibraryItem {
                id: format!("id-{}", name),
                name: name.clone(),
                is_folder: false,
                mime_type: None,
                web_url: Some(format!("https://library.example/{}", name)),
            })
            .collect();
        Ok(Page {
            items,
            next_link: None,
        })
    }

    async fn download(&self, item_id: &str) -> Result<Vec<u8>> {
        self.check_auth()?;
        self.files
            .lock()
            .expect("lock")
            .iter()
            .find(|(name, _)| format!("id-{}", name) == item_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| KbError::Network(format!("HTTP 404 for {}", item_id)))
    }
}

/// A knowledge base in `dir` using the keyword model
pub fn knowledge_base(dir: &Path) -> Arc<KnowledgeBase> {
    Arc::new(KnowledgeBase::new(
        KnowledgeBaseStore::new(dir),
        Arc::new(Embedder::from_model(Arc::new(KeywordModel::default()))),
    ))
}

/// A manager crawling the `.txt` files of `library`
pub fn manager(
    knowledge_base: Arc<KnowledgeBase>,
    library: Arc<MemoryLibrary>,
) -> KnowledgeBaseManager {
    let crawler = DocumentCrawler::new(
        library,
        ExtractorRegistry::with_defaults(),
        vec!["txt".to_string()],
    );
    KnowledgeBaseManager::new(
        knowledge_base,
        crawler,
        ChunkingConfig::default(),
    )
    .expect("valid chunking config")
}
