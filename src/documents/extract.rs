//! Plain-text extraction for uploaded documents.
//!
//! Callers supply bytes plus a content type; `resolve_content_type` picks a
//! supported type from the declared one or, failing that, the file
//! extension.

use std::io::Read;

use quick_xml::events::Event;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_MSWORD: &str = "application/msword";
pub const MIME_TEXT: &str = "text/plain";

/// Upload whitelist, lower-case with leading dot.
pub const ALLOWED_EXTENSIONS: [&str; 4] = [".pdf", ".txt", ".docx", ".doc"];

/// Maximum decompressed bytes read from `word/document.xml` (zip-bomb guard).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("Word extraction failed: {0}")]
    Word(String),
    #[error("text decoding failed: {0}")]
    Text(String),
}

/// Lower-case extension of `file_name` including the dot, if any.
pub fn file_extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_lowercase()))
}

pub fn is_allowed_file_name(file_name: &str) -> bool {
    file_extension(file_name)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn supported_mime(content_type: &str) -> Option<&'static str> {
    // Ignore parameters such as "; charset=utf-8".
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    [MIME_PDF, MIME_DOCX, MIME_MSWORD, MIME_TEXT]
        .into_iter()
        .find(|mime| *mime == essence)
}

/// Declared type when supported, otherwise inferred from the extension.
pub fn resolve_content_type(declared: &str, file_name: &str) -> Option<&'static str> {
    if let Some(mime) = supported_mime(declared) {
        return Some(mime);
    }
    match file_extension(file_name)?.as_str() {
        ".pdf" => Some(MIME_PDF),
        ".docx" => Some(MIME_DOCX),
        ".doc" => Some(MIME_MSWORD),
        ".txt" => Some(MIME_TEXT),
        _ => None,
    }
}

/// Extract plain UTF-8 text. CPU-bound; run it on the blocking pool.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match supported_mime(content_type) {
        Some(MIME_PDF) => extract_pdf(bytes),
        Some(MIME_DOCX) | Some(MIME_MSWORD) => extract_word(bytes),
        Some(MIME_TEXT) => extract_plain(bytes),
        _ => Err(ExtractError::UnsupportedContentType(content_type.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn extract_plain(bytes: &[u8]) -> Result<String, ExtractError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_string()),
        Err(e) => {
            tracing::warn!("Document is not valid UTF-8 ({}), decoding lossily", e);
            Ok(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn extract_word(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Word(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| ExtractError::Word(format!("word/document.xml: {}", e)))?;

    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Word(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Word(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }

    paragraphs_from_document_xml(&doc_xml)
}

/// Concatenate `w:t` runs; each `w:p` ends with a newline, `w:tab` and
/// `w:br` map to a tab and a newline.
fn paragraphs_from_document_xml(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te.unescape().map_err(|e| ExtractError::Word(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Word(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
