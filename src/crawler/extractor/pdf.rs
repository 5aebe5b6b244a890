use anyhow::{Context, Result};
use lopdf::Document;

use super::TextExtractor;

/// Reads the text layer of every page of a PDF.
///
/// Scanned pages without a text layer contribute nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    #[inline]
    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let document = Document::load_mem(bytes).context("not a readable PDF")?;
        let pages: Vec<u32> = document.get_pages().into_keys().collect();
        if pages.is_empty() {
            return Ok(String::new());
        }

        document
            .extract_text(&pages)
            .with_context(|| format!("failed to read text from {} pages", pages.len()))
    }
}
