//! Text extraction for uploaded documents.
//!
//! Turns `(bytes, content type)` into [`ExtractedText`], one entry per page
//! where the format exposes pages: form-feed separated plain text, PDF
//! pages, PowerPoint slides. Word documents and plain text without form
//! feeds come back as a single page.

use std::io::Read;

use docqa_core::chunk::ExtractedText;
use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";
pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_PPTX: &str =
    "application/vnd.openxmlformats-officedocument.presentationml.presentation";

pub const SUPPORTED_TYPES: &[&str] = &[MIME_TEXT, MIME_MARKDOWN, MIME_PDF, MIME_DOCX, MIME_PPTX];

/// Maximum decompressed bytes read from a single ZIP entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
}

pub fn is_supported(content_type: &str) -> bool {
    SUPPORTED_TYPES.contains(&content_type)
}

/// Canonical content type for an upload.
///
/// Parameters such as `; charset=utf-8` are dropped. A missing or generic
/// type (`application/octet-stream`) is inferred from the file extension.
pub fn normalize_content_type(content_type: Option<&str>, filename: &str) -> String {
    let declared = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    if !declared.is_empty() && declared != "application/octet-stream" {
        return declared;
    }
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" => MIME_TEXT.to_string(),
        "md" | "markdown" => MIME_MARKDOWN.to_string(),
        "pdf" => MIME_PDF.to_string(),
        "docx" => MIME_DOCX.to_string(),
        "pptx" => MIME_PPTX.to_string(),
        _ if declared.is_empty() => "application/octet-stream".to_string(),
        _ => declared,
    }
}

pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<ExtractedText, ExtractError> {
    match content_type {
        MIME_TEXT | MIME_MARKDOWN => Ok(ExtractedText::from_form_feeds(&decode_text(bytes))),
        MIME_PDF => extract_pdf(bytes),
        MIME_DOCX => extract_docx(bytes),
        MIME_PPTX => extract_pptx(bytes),
        other => Err(ExtractError::UnsupportedContentType(other.to_string())),
    }
}

fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).replace("\r\n", "\n")
}

fn extract_pdf(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let trimmed = text.trim_end_matches(['\x0c', '\n', ' ']);
    if trimmed.contains('\x0c') {
        Ok(ExtractedText::from_form_feeds(trimmed))
    } else {
        Ok(ExtractedText::single(trimmed))
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| ExtractError::Ooxml(e.to_string()))
}

fn read_entry(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Ooxml(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let xml = read_entry(&mut archive, "word/document.xml")?;
    Ok(ExtractedText::single(paragraph_text(&xml)?))
}

fn extract_pptx(bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let mut slides: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("ppt/slides/slide") && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    slides.sort_by_key(|name| {
        name.trim_start_matches("ppt/slides/slide")
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });

    let mut pages = Vec::with_capacity(slides.len());
    for name in slides {
        let xml = read_entry(&mut archive, &name)?;
        pages.push(paragraph_text(&xml)?);
    }
    Ok(ExtractedText {
        pages,
        paginated: true,
    })
}

/// Text of every `<t>` element, one line per `<p>` paragraph. Works for
/// both WordprocessingML (`w:`) and DrawingML (`a:`) since only local
/// names are compared.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}
