//! Plain-text extraction for manually added documents.
//!
//! Text and Markdown files are read as UTF-8; PDFs go through
//! `pdf-extract`; Word documents are unzipped and the text runs of
//! `word/document.xml` are collected, one line per paragraph. The file
//! type is decided by extension.

use std::io::Read;
use std::path::Path;

use quick_xml::events::Event;

use thiserror::Error;

/// Cap on the decompressed size of `word/document.xml`.
const MAX_DOCX_XML_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0} (expected .txt, .md, .pdf, or .docx)")]
    UnsupportedType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("file is not valid UTF-8 text")]
    NotUtf8,
    #[error("no text could be extracted")]
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Markdown,
    Pdf,
    Docx,
}

impl FileKind {
    pub fn from_path(path: &Path) -> Result<Self, ExtractError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "txt" => Ok(FileKind::Text),
            "md" | "markdown" => Ok(FileKind::Markdown),
            "pdf" => Ok(FileKind::Pdf),
            "docx" => Ok(FileKind::Docx),
            other => Err(ExtractError::UnsupportedType(if other.is_empty() {
                "(no extension)".to_string()
            } else {
                format!(".{}", other)
            })),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FileKind::Text => "txt",
            FileKind::Markdown => "md",
            FileKind::Pdf => "pdf",
            FileKind::Docx => "docx",
        }
    }
}

/// Extract trimmed text from file bytes of the given kind.
pub fn extract_text(bytes: &[u8], kind: FileKind) -> Result<String, ExtractError> {
    let text = match kind {
        FileKind::Text | FileKind::Markdown => {
            String::from_utf8(bytes.to_vec()).map_err(|_| ExtractError::NotUtf8)?
        }
        FileKind::Pdf => {
            pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?
        }
        FileKind::Docx => extract_docx(bytes)?,
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(text.to_string())
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Docx("word/document.xml not found".to_string()))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCX_XML_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if xml.len() as u64 >= MAX_DOCX_XML_BYTES {
        return Err(ExtractError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    paragraph_text(&xml)
}

/// Concatenate `<w:t>` runs, breaking lines at `</w:p>` and mapping
/// `<w:tab/>` and `<w:br/>` to whitespace.
fn paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_run_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_run_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_run_text => {
                let text = t.unescape().map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}
