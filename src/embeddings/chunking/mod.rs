
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;
use tracing::debug;

use crate::{KbError, Result};

/// Configuration for sliding-window chunking, measured in characters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Window length
    pub size: usize,
    /// Characters shared by adjacent windows
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            size: 1000,
            overlap: 100,
        }
    }
}

impl ChunkingConfig {
    /// Distance between the starts of two adjacent windows
    #[inline]
    pub const fn stride(&self) -> usize {
        self.size - self.overlap
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(KbError::InvalidArgument(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.size {
            return Err(KbError::InvalidArgument(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.size
            )));
        }
        Ok(())
    }
}

/// A chunk of a source document's text, the unit of retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// `<document id>_<ordinal>`
    pub chunk_id: String,
    pub source_document_id: String,
    pub text: String,
    pub ordinal: usize,
}

/// Builds the stable identifier of the `ordinal`-th chunk of a document
#[inline]
pub fn chunk_id(document_id: &str, ordinal: usize) -> String {
    format!("{}_{}", document_id, ordinal)
}

/// Lazy sliding window over the characters of a text.
///
/// Windows are `size` characters long and start at `0, stride, 2 * stride, ...`
/// until a window reaches the end of the text. The last window may be shorter.
/// Boundaries fall on character offsets only, so words and sentences can be split.
/// A clone replays the remaining windows from the same position.
#[derive(Debug, Clone)]
pub struct SlidingWindow<'a> {
    text: &'a str,
    /// Byte offset of every character, plus `text.len()` as a terminator
    boundaries: Vec<usize>,
    size: usize,
    stride: usize,
    next_start: Option<usize>,
}

impl<'a> SlidingWindow<'a> {
    #[inline]
    pub fn new(text: &'a str, config: ChunkingConfig) -> Result<Self> {
        config.validate()?;

        let mut boundaries: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
        let char_count = boundaries.len();
        boundaries.push(text.len());

        Ok(Self {
            text,
            boundaries,
            size: config.size,
            stride: config.stride(),
            next_start: (char_count > 0).then_some(0),
        })
    }

    fn char_count(&self) -> usize {
        self.boundaries.len() - 1
    }
}

impl<'a> Iterator for SlidingWindow<'a> {
    type Item = &'a str;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next_start?;
        let char_count = self.char_count();
        let end = (start + self.size).min(char_count);

        self.next_start = (end < char_count).then_some(start + self.stride);

        self.text.get(self.boundaries[start]..self.boundaries[end])
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.next_start.map_or(0, |start| {
            let char_count = self.char_count();
            if start + self.size >= char_count {
                1
            } else {
                1 + (char_count - start - self.size).div_ceil(self.stride)
            }
        });
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for SlidingWindow<'_> {}

impl FusedIterator for SlidingWindow<'_> {}

/// Splits `text` into overlapping windows of `config.size` characters
#[inline]
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Result<SlidingWindow<'_>> {
    SlidingWindow::new(text, config)
}

/// Chunks a whole document, assigning ordinals and stable chunk ids
#[inline]
pub fn chunk_document(
    document_id: &str,
    text: &str,
    config: ChunkingConfig,
) -> Result<Vec<Chunk>> {
    let chunks: Vec<Chunk> = chunk_text(text, config)?
        .enumerate()
        .map(|(ordinal, window)| Chunk {
            chunk_id: chunk_id(document_id, ordinal),
            source_document_id: document_id.to_string(),
            text: window.to_string(),
            ordinal,
        })
        .collect();

    debug!(
        "Chunked document {} ({} chars) into {} chunks",
        document_id,
        text.chars().count(),
        chunks.len()
    );

    Ok(chunks)
}
