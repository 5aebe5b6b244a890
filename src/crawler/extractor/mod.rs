pub mod pdf;
pub mod word;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub use self::pdf::PdfExtractor;
pub use self::word::WordProcessingExtractor;
use crate::crawler::DocumentKind;
use crate::{KbError, Result};

/// Turns the raw bytes of one kind of document into plain text
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> anyhow::Result<String>;
}

/// Decodes UTF-8, replacing invalid sequences
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    #[inline]
    fn extract(&self, bytes: &[u8]) -> anyhow::Result<String> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

/// Collapses every run of whitespace into one space and trims both ends
#[inline]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extractors keyed by document kind.
///
/// Plain text, `.docx` and PDF are built in. Other kinds can be supported by
/// registering an extractor for them.
#[derive(Clone, Default)]
pub struct ExtractorRegistry {
    extractors: HashMap<DocumentKind, Arc<dyn TextExtractor>>,
}

impl fmt::Debug for ExtractorRegistry {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.extractors.keys().map(DocumentKind::as_str).collect();
        kinds.sort_unstable();
        f.debug_struct("ExtractorRegistry")
            .field("kinds", &kinds)
            .finish()
    }
}

impl ExtractorRegistry {
    /// A registry with no extractors
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in extractor
    #[inline]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(DocumentKind::PlainText, Arc::new(PlainTextExtractor));
        registry.register(
            DocumentKind::WordProcessing,
            Arc::new(WordProcessingExtractor),
        );
        registry.register(DocumentKind::Pdf, Arc::new(PdfExtractor));
        registry
    }

    /// Registers `extractor` for `kind`, replacing any earlier one
    #[inline]
    pub fn register(&mut self, kind: DocumentKind, extractor: Arc<dyn TextExtractor>) {
        self.extractors.insert(kind, extractor);
    }

    #[inline]
    pub fn supports(&self, kind: DocumentKind) -> bool {
        self.extractors.contains_key(&kind)
    }

    /// Extracts and whitespace-normalizes the text of `document`.
    ///
    /// Fails with [`KbError::ExtractionFailed`] when no extractor handles `kind`,
    /// when the extractor fails, or when no text remains.
    #[inline]
    pub fn extract(&self, document: &str, kind: DocumentKind, bytes: &[u8]) -> Result<String> {
        let failed = |reason: String| KbError::ExtractionFailed {
            document: document.to_string(),
            reason,
        };

        let extractor = self
            .extractors
            .get(&kind)
            .ok_or_else(|| failed(format!("no extractor registered for {} files", kind)))?;

        let raw = extractor
            .extract(bytes)
            .map_err(|e| failed(format!("{:#}", e)))?;
        let text = normalize_whitespace(&raw);

        if text.is_empty() {
            return Err(failed("document contains no text".to_string()));
        }

        debug!(
            "Extracted {} chars of {} text from {}",
            text.len(),
            kind,
            document
        );
        Ok(text)
    }
}
