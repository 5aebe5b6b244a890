pub mod extractor;
pub mod graph;


use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use self::extractor::ExtractorRegistry;
use crate::{KbError, Result};

const WORD_PROCESSING_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Kinds of file the crawler knows how to turn into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    PlainText,
    WordProcessing,
    Pdf,
}

impl DocumentKind {
    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "docx" => Some(Self::WordProcessing),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    #[inline]
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "text/plain" => Some(Self::PlainText),
            WORD_PROCESSING_MIME => Some(Self::WordProcessing),
            "application/pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Classifies a file by extension first, then by declared MIME type.
    ///
    /// Only extensions listed in `supported_extensions` are accepted.
    #[inline]
    pub fn classify(
        name: &str,
        mime_type: Option<&str>,
        supported_extensions: &[String],
    ) -> Option<Self> {
        let is_supported = |kind: Self| {
            supported_extensions
                .iter()
                .filter_map(|ext| Self::from_extension(ext))
                .any(|supported| supported == kind)
        };

        let by_extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| {
                supported_extensions
                    .iter()
                    .any(|supported| supported.eq_ignore_ascii_case(ext))
            })
            .and_then(Self::from_extension);

        by_extension.or_else(|| {
            mime_type
                .and_then(Self::from_mime_type)
                .filter(|kind| is_supported(*kind))
        })
    }

    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "plain text",
            Self::WordProcessing => "word processing",
            Self::Pdf => "pdf",
        }
    }
}

impl fmt::Display for DocumentKind {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A supported file found in the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub name: String,
    /// Path relative to the crawl root, `/`-separated
    pub path: String,
    pub source_url: Option<String>,
    pub mime_type: Option<String>,
    pub kind: DocumentKind,
}

/// One entry of a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryItem {
    pub id: String,
    pub name: String,
    pub is_folder: bool,
    pub mime_type: Option<String>,
    pub web_url: Option<String>,
}

/// One page of a folder listing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<LibraryItem>,
    /// Opaque link to the next page, `None` on the last page
    pub next_link: Option<String>,
}

/// Remote document library the crawler walks.
///
/// Implementations report rejected credentials as [`KbError::AuthFailure`] and
/// transport problems as [`KbError::Network`].
#[async_trait]
pub trait DocumentLibrary: Send + Sync {
    /// Id of the folder crawling starts from
    async fn root_folder(&self) -> Result<String>;

    /// Lists one page of a folder. `page_link` is the previous page's `next_link`.
    async fn enumerate_children(&self, folder_id: &str, page_link: Option<&str>) -> Result<Page>;

    async fn download(&self, item_id: &str) -> Result<Vec<u8>>;
}

/// Text of one successfully extracted document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub document: Document,
    pub text: String,
}

/// A document left out of the build, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub name: String,
    pub path: String,
    pub reason: String,
}

/// Result of a full crawl
#[derive(Debug, Clone, Default)]
pub struct CrawlOutcome {
    pub documents: Vec<ExtractedDocument>,
    pub skipped: Vec<SkippedDocument>,
    pub duration: Duration,
}

/// Walks a [`DocumentLibrary`] and turns its supported files into text
pub struct DocumentCrawler {
    library: Arc<dyn DocumentLibrary>,
    extractors: ExtractorRegistry,
    supported_extensions: Vec<String>,
}

impl fmt::Debug for DocumentCrawler {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentCrawler")
            .field("extractors", &self.extractors)
            .field("supported_extensions", &self.supported_extensions)
            .finish_non_exhaustive()
    }
}

impl DocumentCrawler {
    #[inline]
    pub fn new(
        library: Arc<dyn DocumentLibrary>,
        extractors: ExtractorRegistry,
        supported_extensions: Vec<String>,
    ) -> Self {
        Self {
            library,
            extractors,
            supported_extensions,
        }
    }

    /// Lists every supported document below `root_folder_id`.
    ///
    /// Folders are walked depth-first; within a folder, files come before the
    /// contents of its subfolders. Entries that cannot be classified are skipped.
    #[inline]
    pub async fn list_documents(&self, root_folder_id: &str) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![(root_folder_id.to_string(), String::new())];

        while let Some((folder_id, folder_path)) = pending.pop() {
            if !visited.insert(folder_id.clone()) {
                warn!("Folder {} was already visited, skipping", folder_id);
                continue;
            }

            let items = self.list_folder(&folder_id).await?;
            let mut subfolders = Vec::new();

            for item in items {
                let path = if folder_path.is_empty() {
                    item.name.clone()
                } else {
                    format!("{}/{}", folder_path, item.name)
                };

                if item.is_folder {
                    subfolders.push((item.id, path));
                    continue;
                }

                match DocumentKind::classify(
                    &item.name,
                    item.mime_type.as_deref(),
                    &self.supported_extensions,
                ) {
                    Some(kind) => {
                        debug!("Found {} document: {}", kind, path);
                        documents.push(Document {
                            id: item.id,
                            name: item.name,
                            path,
                            source_url: item.web_url,
                            mime_type: item.mime_type,
                            kind,
                        });
                    }
                    None => {
                        warn!(
                            "Skipping unsupported entry {} (type {})",
                            path,
                            item.mime_type.as_deref().unwrap_or("unknown")
                        );
                    }
                }
            }

            pending.extend(subfolders.into_iter().rev());
        }

        info!("Found {} supported documents", documents.len());
        Ok(documents)
    }

    /// Downloads the raw bytes of a document
    #[inline]
    pub async fn fetch_content(&self, document: &Document) -> Result<Vec<u8>> {
        self.library.download(&document.id).await
    }

    /// Crawls the whole library from its root folder and extracts each document's text.
    ///
    /// Only an authentication failure or a failure to list a folder aborts the
    /// crawl. A document that cannot be downloaded or extracted is recorded in
    /// [`CrawlOutcome::skipped`].
    #[inline]
    pub async fn crawl(&self) -> Result<CrawlOutcome> {
        let start_time = Instant::now();
        let root = self.library.root_folder().await?;
        let documents = self.list_documents(&root).await?;

        let bar = if console::user_attended_stderr() {
            ProgressBar::new(documents.len() as u64).with_style(
                ProgressStyle::with_template("{spinner} [{pos}/{len}] Fetching {msg}")
                    .expect("style template is valid"),
            )
        } else {
            ProgressBar::hidden()
        };

        let mut outcome = CrawlOutcome::default();

        for document in documents {
            bar.set_message(document.name.clone());

            match self.fetch_text(&document).await {
                Ok(text) => {
                    debug!("Extracted {} chars from {}", text.len(), document.path);
                    outcome.documents.push(ExtractedDocument { document, text });
                }
                Err(e @ KbError::AuthFailure(_)) => {
                    bar.finish_and_clear();
                    return Err(e);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", document.path, e);
                    outcome.skipped.push(SkippedDocument {
                        name: document.name,
                        path: document.path,
                        reason: e.to_string(),
                    });
                }
            }

            bar.inc(1);
        }

        bar.finish_and_clear();
        outcome.duration = start_time.elapsed();

        info!(
            "Crawl finished: {} documents extracted, {} skipped, took {:?}",
            outcome.documents.len(),
            outcome.skipped.len(),
            outcome.duration
        );
        Ok(outcome)
    }

    async fn fetch_text(&self, document: &Document) -> Result<String> {
        let bytes = self.fetch_content(document).await?;
        self.extractors.extract(&document.name, document.kind, &bytes)
    }

    /// Collects every page of one folder listing
    async fn list_folder(&self, folder_id: &str) -> Result<Vec<LibraryItem>> {
        let mut items = Vec::new();
        let mut seen_links = HashSet::new();
        let mut page_link: Option<String> = None;

        loop {
            let page = self
                .library
                .enumerate_children(folder_id, page_link.as_deref())
                .await?;
            items.extend(page.items);

            match page.next_link {
                Some(next) if seen_links.insert(next.clone()) => {
                    debug!("Following next page of folder {}", folder_id);
                    page_link = Some(next);
                }
                Some(next) => {
                    warn!("Pagination loop detected at {}, stopping", next);
                    break;
                }
                None => break,
            }
        }

        Ok(items)
    }
}
