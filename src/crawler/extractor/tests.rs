use super::*;
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

struct FailingExtractor;

impl TextExtractor for FailingExtractor {
    fn extract(&self, _bytes: &[u8]) -> anyhow::Result<String> {
        Err(anyhow::anyhow!("encrypted file"))
    }
}

/// A `.docx` archive holding `document_xml` as its main part
fn word_document(document_xml: &str) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("[Content_Types].xml", SimpleFileOptions::default())
        .expect("start file");
    writer.write_all(b"<Types/>").expect("write");
    writer
        .start_file("word/document.xml", SimpleFileOptions::default())
        .expect("start file");
    writer.write_all(document_xml.as_bytes()).expect("write");
    writer.finish().expect("finish zip").into_inner()
}

fn paragraphs(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{}</w:body></w:document>"#,
        body
    )
}

/// A one-page PDF showing `line` in a standard font
fn pdf_document(line: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(line)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}

struct UpperExtractor;

impl TextExtractor for UpperExtractor {
    fn extract(&self, bytes: &[u8]) -> anyhow::Result<String> {
        Ok(String::from_utf8_lossy(bytes).to_uppercase())
    }
}

#[test]
fn whitespace_is_collapsed() {
    assert_eq!(
        normalize_whitespace("  Quarterly\n\n report\t\tfor  2024 \r\n"),
        "Quarterly report for 2024"
    );
    assert_eq!(normalize_whitespace(" \n\t "), "");
}

#[test]
fn plain_text_is_decoded_lossily() {
    let text = PlainTextExtractor
        .extract(b"caf\xC3\xA9 \xFF ok")
        .expect("plain text never fails");
    assert_eq!(text, "café \u{FFFD} ok");
}

#[test]
fn byte_order_mark_is_dropped() {
    let text = PlainTextExtractor
        .extract(b"\xEF\xBB\xBFhello")
        .expect("plain text never fails");
    assert_eq!(text, "hello");
}

#[test]
fn defaults_cover_every_document_kind() {
    let registry = ExtractorRegistry::with_defaults();

    assert!(registry.supports(DocumentKind::PlainText));
    assert!(registry.supports(DocumentKind::WordProcessing));
    assert!(registry.supports(DocumentKind::Pdf));
}

#[test]
fn word_document_paragraphs_become_lines() {
    let bytes = word_document(&paragraphs(
        "<w:p><w:r><w:t>Refunds</w:t></w:r><w:r><w:t xml:space=\"preserve\"> &amp; returns</w:t></w:r></w:p>\
         <w:p><w:r><w:t>Days</w:t><w:tab/><w:t>30</w:t><w:br/><w:t>Ask first</w:t></w:r></w:p>",
    ));

    let text = WordProcessingExtractor.extract(&bytes).expect("extract docx");

    assert_eq!(text, "Refunds & returns\nDays\t30\nAsk first\n");
}

#[test]
fn word_field_codes_are_skipped() {
    let text = word::document_text(&paragraphs(
        "<w:p><w:r><w:instrText> PAGE </w:instrText></w:r><w:r><w:t>Page one</w:t></w:r></w:p>",
    ))
    .expect("parse");
    assert_eq!(text, "Page one\n");
}

#[test]
fn word_document_through_registry() {
    let registry = ExtractorRegistry::with_defaults();
    let bytes = word_document(&paragraphs(
        "<w:p><w:r><w:t>Shipping takes</w:t></w:r></w:p><w:p><w:r><w:t>five days</w:t></w:r></w:p>",
    ));

    let text = registry
        .extract("policy.docx", DocumentKind::WordProcessing, &bytes)
        .expect("extract");
    assert_eq!(text, "Shipping takes five days");
}

#[test]
fn archive_without_document_part_fails() {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .start_file("notes.txt", SimpleFileOptions::default())
        .expect("start file");
    writer.write_all(b"hello").expect("write");
    let bytes = writer.finish().expect("finish zip").into_inner();

    let err = WordProcessingExtractor
        .extract(&bytes)
        .expect_err("no document part");
    assert!(format!("{:#}", err).contains("word/document.xml"));
}

#[test]
fn corrupt_word_document_is_an_extraction_failure() {
    let registry = ExtractorRegistry::with_defaults();
    let err = registry
        .extract("broken.docx", DocumentKind::WordProcessing, b"PK\x03\x04 not really")
        .expect_err("corrupt archive");

    match err {
        KbError::ExtractionFailed { document, .. } => assert_eq!(document, "broken.docx"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn pdf_text_layer_is_read() {
    let bytes = pdf_document("Warranty lasts two years");

    let text = ExtractorRegistry::with_defaults()
        .extract("warranty.pdf", DocumentKind::Pdf, &bytes)
        .expect("extract pdf");

    assert!(text.contains("Warranty lasts two years"), "text: {}", text);
}

#[test]
fn corrupt_pdf_is_an_extraction_failure() {
    let err = ExtractorRegistry::with_defaults()
        .extract("scan.pdf", DocumentKind::Pdf, b"%PDF-1.7 truncated")
        .expect_err("unreadable pdf");
    assert!(matches!(err, KbError::ExtractionFailed { .. }), "got {:?}", err);
}

#[test]
fn extract_normalizes_text() {
    let registry = ExtractorRegistry::with_defaults();
    let text = registry
        .extract("notes.txt", DocumentKind::PlainText, b"line one\n\nline   two")
        .expect("extract");
    assert_eq!(text, "line one line two");
}

#[test]
fn missing_extractor_is_an_extraction_failure() {
    let registry = ExtractorRegistry::empty();
    let err = registry
        .extract("scan.pdf", DocumentKind::Pdf, b"%PDF-1.7")
        .expect_err("no pdf extractor");

    match err {
        KbError::ExtractionFailed { document, reason } => {
            assert_eq!(document, "scan.pdf");
            assert!(reason.contains("pdf"), "reason: {}", reason);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn blank_documents_are_rejected() {
    let registry = ExtractorRegistry::with_defaults();
    let err = registry
        .extract("blank.txt", DocumentKind::PlainText, b" \n \t ")
        .expect_err("nothing to index");
    assert!(matches!(err, KbError::ExtractionFailed { .. }));
}

#[test]
fn extractor_errors_are_wrapped() {
    let mut registry = ExtractorRegistry::empty();
    registry.register(DocumentKind::Pdf, Arc::new(FailingExtractor));

    let err = registry
        .extract("locked.pdf", DocumentKind::Pdf, b"")
        .expect_err("extractor fails");
    assert!(err.to_string().contains("encrypted file"));
}

#[test]
fn registered_extractor_replaces_previous() {
    let mut registry = ExtractorRegistry::with_defaults();
    registry.register(DocumentKind::PlainText, Arc::new(UpperExtractor));

    let text = registry
        .extract("a.txt", DocumentKind::PlainText, b"quiet")
        .expect("extract");
    assert_eq!(text, "QUIET");
}
