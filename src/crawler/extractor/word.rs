use anyhow::{Context, Result};
use quick_xml::Reader;
use quick_xml::events::Event;
use std::io::{Cursor, Read};
use zip::ZipArchive;

use super::TextExtractor;

const DOCUMENT_PART: &str = "word/document.xml";

/// Reads the body text of an Office Open XML (`.docx`) document
#[derive(Debug, Clone, Copy, Default)]
pub struct WordProcessingExtractor;

impl TextExtractor for WordProcessingExtractor {
    #[inline]
    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let mut archive =
            ZipArchive::new(Cursor::new(bytes)).context("not a word-processing archive")?;
        let mut xml = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .with_context(|| format!("archive has no {}", DOCUMENT_PART))?
            .read_to_string(&mut xml)
            .with_context(|| format!("failed to read {}", DOCUMENT_PART))?;

        document_text(&xml)
    }
}

/// Collects the text runs of a WordprocessingML body, one line per paragraph
pub(crate) fn document_text(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut text = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event().context("malformed document XML")? {
            Event::Start(element) if element.local_name().as_ref() == b"t" => {
                in_run_text = true;
            }
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"p" => text.push('\n'),
                _ => {}
            },
            Event::Empty(element) => match element.local_name().as_ref() {
                b"tab" => text.push('\t'),
                b"br" | b"cr" => text.push('\n'),
                _ => {}
            },
            Event::Text(run) if in_run_text => {
                text.push_str(&run.unescape().context("bad text escape")?);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(text)
}
