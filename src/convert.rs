//! Document-to-text conversion keyed by file extension.
//!
//! Each supported format maps to one pure extraction function returning plain
//! UTF-8 text: `.pdf` via pdf-extract, `.docx` via ZIP + `word/document.xml`
//! parsing, `.txt`/`.md` read directly with a Latin-1 fallback when the bytes
//! are not valid UTF-8. Unsupported extensions and corrupt content fail with
//! a descriptive error; the file processor records the message verbatim.

use std::io::Read;
use std::path::Path;

/// Extensions (lowercase, without the dot) this module can convert.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["pdf", "docx", "txt", "md"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb
/// protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Conversion error. Never panics; the per-file pipeline records the message
/// and moves on to the next file.
#[derive(Debug)]
pub enum ConvertError {
    UnsupportedExtension(String),
    Io(String),
    Pdf(String),
    Docx(String),
}

impl std::fmt::Display for ConvertError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvertError::UnsupportedExtension(ext) => {
                write!(f, "unsupported file type: {}", ext)
            }
            ConvertError::Io(e) => write!(f, "failed to read file: {}", e),
            ConvertError::Pdf(e) => write!(f, "PDF conversion failed: {}", e),
            ConvertError::Docx(e) => write!(f, "DOCX conversion failed: {}", e),
        }
    }
}

impl std::error::Error for ConvertError {}

/// True when the file's extension has a registered converter.
pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Convert a file to plain text based on its extension.
pub fn convert(path: &Path) -> Result<String, ConvertError> {
    match extension_of(path).as_str() {
        "pdf" => convert_pdf(path),
        "docx" => convert_docx(path),
        "txt" | "md" => convert_text(path),
        "" => Err(ConvertError::UnsupportedExtension("(none)".to_string())),
        other => Err(ConvertError::UnsupportedExtension(format!(".{}", other))),
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn convert_pdf(path: &Path) -> Result<String, ConvertError> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::Io(e.to_string()))?;
    pdf_extract::extract_text_from_mem(&bytes).map_err(|e| ConvertError::Pdf(e.to_string()))
}

/// Extract paragraph text from `word/document.xml` inside the DOCX archive.
/// Paragraphs are joined with blank lines so the chunker can split on them.
fn convert_docx(path: &Path) -> Result<String, ConvertError> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::Io(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ConvertError::Docx(e.to_string()))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ConvertError::Docx("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ConvertError::Docx(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ConvertError::Docx(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    extract_paragraphs(&doc_xml)
}

/// Pull `<w:t>` runs out of the document XML, one paragraph per `<w:p>`.
fn extract_paragraphs(xml: &[u8]) -> Result<String, ConvertError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text_run = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_text_run = true;
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                current.push_str(t.unescape().unwrap_or_default().as_ref());
            }
            Ok(quick_xml::events::Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text_run = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        paragraphs.push(current.trim().to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ConvertError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !current.trim().is_empty() {
        paragraphs.push(current.trim().to_string());
    }

    Ok(paragraphs.join("\n\n"))
}

/// Read a text file as UTF-8, falling back to Latin-1 when decoding fails.
fn convert_text(path: &Path) -> Result<String, ConvertError> {
    let bytes = std::fs::read(path).map_err(|e| ConvertError::Io(e.to_string()))?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        // Latin-1 maps each byte to the code point with the same value.
        Err(e) => Ok(e.into_bytes().iter().map(|&b| b as char).collect()),
    }
}
