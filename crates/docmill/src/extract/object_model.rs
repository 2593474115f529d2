//! Object-model engine: full structural parse via lopdf.

use std::path::Path;
use std::time::Instant;

use lopdf::{Document, Object};

use super::{DocumentMetadata, ExtractError, Extraction, Extractor, Page};

pub struct ObjectModelExtractor;

impl Extractor for ObjectModelExtractor {
    fn name(&self) -> &'static str {
        "object-model"
    }

    fn extract(&self, source: &Path) -> Result<Extraction, ExtractError> {
        let started = Instant::now();
        let doc = Document::load(source).map_err(|e| ExtractError::Parse(e.to_string()))?;

        let mut warnings = Vec::new();
        let mut pages = Vec::new();
        for (page_num, _) in doc.get_pages() {
            match doc.extract_text(&[page_num]) {
                Ok(text) => pages.push(Page {
                    number: page_num,
                    text: text.trim_end().to_string(),
                }),
                Err(e) => {
                    // A single unreadable page degrades the result, it
                    // does not fail the whole document.
                    tracing::warn!(page = page_num, error = %e, "page text extraction failed");
                    warnings.push(format!("page {}: {}", page_num, e));
                    pages.push(Page {
                        number: page_num,
                        text: String::new(),
                    });
                }
            }
        }

        if pages.iter().all(|p| p.text.trim().is_empty()) {
            return Err(ExtractError::NoText);
        }

        let mut metadata = read_info_dict(&doc);
        metadata.page_count = pages.len() as u32;

        Ok(Extraction {
            metadata,
            pages,
            engine: self.name().to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            warnings,
        })
    }

    fn metadata(&self, source: &Path) -> Result<DocumentMetadata, ExtractError> {
        let doc = Document::load(source).map_err(|e| ExtractError::Parse(e.to_string()))?;
        let mut metadata = read_info_dict(&doc);
        metadata.page_count = doc.get_pages().len() as u32;
        Ok(metadata)
    }

    fn validate(&self, source: &Path) -> bool {
        Document::load(source).is_ok()
    }
}

fn read_info_dict(doc: &Document) -> DocumentMetadata {
    let mut metadata = DocumentMetadata::default();

    let info = doc
        .trailer
        .get(b"Info")
        .ok()
        .and_then(|obj| resolve_dict(doc, obj));
    if let Some(dict) = info {
        metadata.title = string_entry(doc, dict, b"Title");
        metadata.author = string_entry(doc, dict, b"Author");
        metadata.subject = string_entry(doc, dict, b"Subject");
        metadata.producer = string_entry(doc, dict, b"Producer");
    }

    metadata
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a lopdf::Dictionary> {
    match obj {
        Object::Dictionary(dict) => Some(dict),
        Object::Reference(id) => doc.get_object(*id).ok().and_then(|o| o.as_dict().ok()),
        _ => None,
    }
}

fn string_entry(doc: &Document, dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    let obj = dict.get(key).ok()?;
    let obj = match obj {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    match obj {
        Object::String(bytes, _) => {
            let text = decode_pdf_string(bytes);
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    }
}

/// PDF text strings are either UTF-16BE with a BOM or PDFDocEncoding,
/// which is close enough to Latin-1 for the Info dictionary fields.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        bytes.iter().map(|&b| b as char).collect()
    }
}
