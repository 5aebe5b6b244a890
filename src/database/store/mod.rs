
use anyhow::Context;
use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::database::vector_index::VectorIndex;
use crate::{KbError, Result};

pub const INDEX_FILE: &str = "index.arrow";
pub const METADATA_FILE: &str = "metadata.json";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const MANIFEST_VERSION: u32 = 1;

const CURRENT_DIR: &str = "current";
const PREVIOUS_DIR: &str = "previous";

/// Metadata for one index slot. Record `i` describes vector `i`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    pub source_doc_id: String,
    pub source_doc_name: String,
    pub source_doc_path: String,
    #[serde(default)]
    pub source_url: Option<String>,
    pub chunk_text: String,
    pub chunk_id: String,
}

/// A source document as shown to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedDocument {
    pub name: String,
    pub path: String,
    pub url: Option<String>,
}

impl From<&ChunkRecord> for IndexedDocument {
    #[inline]
    fn from(record: &ChunkRecord) -> Self {
        Self {
            name: record.source_doc_name.clone(),
            path: record.source_doc_path.clone(),
            url: record.source_url.clone(),
        }
    }
}

/// Summary written next to the index and metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub format_version: u32,
    pub built_at: DateTime<Utc>,
    pub chunk_count: usize,
    pub document_count: usize,
    pub dimension: usize,
    pub embedding_model: String,
}

/// A complete, consistent knowledge base: vectors, their metadata, and the manifest.
///
/// Construction enforces `index.len() == records.len()`; a snapshot is never
/// mutated after it is built.
#[derive(Debug, Clone)]
pub struct KnowledgeSnapshot {
    manifest: Manifest,
    index: VectorIndex,
    records: Vec<ChunkRecord>,
}

impl KnowledgeSnapshot {
    #[inline]
    pub fn new(
        index: VectorIndex,
        records: Vec<ChunkRecord>,
        embedding_model: impl Into<String>,
    ) -> Result<Self> {
        if index.len() != records.len() {
            return Err(KbError::InvalidArgument(format!(
                "index holds {} vectors but {} metadata records were supplied",
                index.len(),
                records.len()
            )));
        }

        let manifest = Manifest {
            format_version: MANIFEST_VERSION,
            built_at: Utc::now(),
            chunk_count: records.len(),
            document_count: records.iter().map(|r| &r.source_doc_id).unique().count(),
            dimension: index.dimension(),
            embedding_model: embedding_model.into(),
        };

        Ok(Self {
            manifest,
            index,
            records,
        })
    }

    #[inline]
    pub const fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[inline]
    pub const fn index(&self) -> &VectorIndex {
        &self.index
    }

    #[inline]
    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    #[inline]
    pub fn record(&self, slot: usize) -> Option<&ChunkRecord> {
        self.records.get(slot)
    }

    /// Distinct source documents in first-seen slot order
    #[inline]
    pub fn documents(&self) -> Vec<IndexedDocument> {
        self.records
            .iter()
            .unique_by(|r| &r.source_doc_id)
            .map(IndexedDocument::from)
            .collect()
    }
}

/// On-disk home of the knowledge base.
///
/// The three artifacts always live together in one directory. Saving writes a
/// complete staging directory and then swaps it in for the current one, so a
/// reader never sees an index from one build paired with metadata from another.
#[derive(Debug, Clone)]
pub struct KnowledgeBaseStore {
    root: PathBuf,
}

impl KnowledgeBaseStore {
    #[inline]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn current_dir(&self) -> PathBuf {
        self.root.join(CURRENT_DIR)
    }

    fn previous_dir(&self) -> PathBuf {
        self.root.join(PREVIOUS_DIR)
    }

    /// Whether any persisted knowledge base exists
    #[inline]
    pub fn exists(&self) -> bool {
        self.current_dir().is_dir() || self.previous_dir().is_dir()
    }

    /// Persists a snapshot, replacing whatever was stored before
    #[inline]
    pub fn save(&self, snapshot: &KnowledgeSnapshot) -> Result<()> {
        fs::create_dir_all(&self.root).with_context(|| {
            format!(
                "Failed to create knowledge base directory: {}",
                self.root.display()
            )
        })?;

        let staging = self.root.join(format!(
            ".staging-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::create_dir(&staging).with_context(|| {
            format!("Failed to create staging directory: {}", staging.display())
        })?;

        if let Err(e) = Self::write_artifacts(&staging, snapshot) {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!(
                    "Failed to remove staging directory {}: {}",
                    staging.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        self.publish(&staging)?;

        info!(
            "Persisted knowledge base with {} chunks from {} documents to {}",
            snapshot.manifest.chunk_count,
            snapshot.manifest.document_count,
            self.current_dir().display()
        );
        Ok(())
    }

    /// Loads the persisted knowledge base.
    ///
    /// Returns [`KbError::RebuildRequired`] when nothing has been persisted yet and
    /// [`KbError::IndexCorrupt`] when the artifacts are unreadable or disagree.
    #[inline]
    pub fn load(&self) -> Result<KnowledgeSnapshot> {
        let current = self.current_dir();
        let dir = if current.is_dir() {
            current
        } else {
            let previous = self.previous_dir();
            if !previous.is_dir() {
                return Err(KbError::RebuildRequired(format!(
                    "no persisted knowledge base in {}",
                    self.root.display()
                )));
            }
            warn!(
                "Current knowledge base missing, recovering from {}",
                previous.display()
            );
            previous
        };

        for file in [MANIFEST_FILE, METADATA_FILE, INDEX_FILE] {
            if !dir.join(file).is_file() {
                return Err(KbError::IndexCorrupt(format!(
                    "{} is missing from {}",
                    file,
                    dir.display()
                )));
            }
        }

        let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE))?;
        if manifest.format_version != MANIFEST_VERSION {
            return Err(KbError::IndexCorrupt(format!(
                "unsupported manifest version {}",
                manifest.format_version
            )));
        }

        let records: Vec<ChunkRecord> = read_json(&dir.join(METADATA_FILE))?;
        let index = VectorIndex::load(&dir.join(INDEX_FILE))?;

        if index.len() != records.len() {
            return Err(KbError::IndexCorrupt(format!(
                "index holds {} vectors but metadata has {} records",
                index.len(),
                records.len()
            )));
        }
        if manifest.chunk_count != records.len() {
            return Err(KbError::IndexCorrupt(format!(
                "manifest lists {} chunks but metadata has {} records",
                manifest.chunk_count,
                records.len()
            )));
        }
        if !index.is_empty() && manifest.dimension != index.dimension() {
            return Err(KbError::IndexCorrupt(format!(
                "manifest dimension {} does not match index dimension {}",
                manifest.dimension,
                index.dimension()
            )));
        }
        if let Some((slot, _)) = records
            .iter()
            .find_position(|r| r.chunk_id.is_empty() || r.source_doc_id.is_empty())
        {
            return Err(KbError::IndexCorrupt(format!(
                "metadata record {} has no chunk or document id",
                slot
            )));
        }

        debug!(
            "Loaded knowledge base built at {} ({} chunks)",
            manifest.built_at, manifest.chunk_count
        );

        Ok(KnowledgeSnapshot {
            manifest,
            index,
            records,
        })
    }

    fn write_artifacts(dir: &Path, snapshot: &KnowledgeSnapshot) -> Result<()> {
        snapshot.index.persist(&dir.join(INDEX_FILE))?;
        write_json(&dir.join(METADATA_FILE), &snapshot.records)?;
        // Written last: a staging directory with a manifest is complete.
        write_json(&dir.join(MANIFEST_FILE), &snapshot.manifest)?;
        Ok(())
    }

    fn publish(&self, staging: &Path) -> Result<()> {
        let current = self.current_dir();
        let previous = self.previous_dir();

        if previous.exists() {
            fs::remove_dir_all(&previous).with_context(|| {
                format!("Failed to remove stale directory: {}", previous.display())
            })?;
        }
        if current.exists() {
            fs::rename(&current, &previous).with_context(|| {
                format!("Failed to retire knowledge base: {}", current.display())
            })?;
        }
        fs::rename(staging, &current).with_context(|| {
            format!("Failed to publish knowledge base: {}", current.display())
        })?;

        if previous.exists() {
            if let Err(e) = fs::remove_dir_all(&previous) {
                warn!(
                    "Failed to remove previous knowledge base {}: {}",
                    previous.display(),
                    e
                );
            }
        }
        Ok(())
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    writer.flush()?;
    writer
        .into_inner()
        .map_err(|e| KbError::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| KbError::IndexCorrupt(format!("{}: {}", path.display(), e)))
}
