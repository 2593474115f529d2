//! PDF text extraction engines.
//!
//! Two engines share the [`Extractor`] trait. The object-model engine
//! parses the full document structure and is the accurate path; the
//! stream-scan engine does a lenient byte-level scan of content streams
//! and serves as the fallback for documents the parser rejects. The
//! [`AutoExtractor`] chains them in that order.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod auto;
pub mod object_model;
pub mod stream_scan;

pub use auto::AutoExtractor;
pub use object_model::ObjectModelExtractor;
pub use stream_scan::StreamScanExtractor;

/// Which engine to run for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineChoice {
    /// Object-model engine only.
    Object,
    /// Stream-scan engine only.
    Scan,
    /// Object-model first, stream-scan on failure.
    Auto,
}

impl std::fmt::Display for EngineChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineChoice::Object => f.write_str("object"),
            EngineChoice::Scan => f.write_str("scan"),
            EngineChoice::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse document: {0}")]
    Parse(String),

    #[error("Document contains no extractable text")]
    NoText,
}

/// Document-level metadata pulled from the PDF Info dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub producer: Option<String>,
    pub page_count: u32,
}

/// One page of extracted text. Pages are 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub number: u32,
    pub text: String,
}

/// The complete result of running an engine over a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub metadata: DocumentMetadata,
    pub pages: Vec<Page>,
    /// Name of the engine that actually produced the text. Under
    /// [`EngineChoice::Auto`] this names the engine that served, not
    /// the one requested.
    pub engine: String,
    pub elapsed_ms: u64,
    pub warnings: Vec<String>,
}

/// A text extraction engine.
pub trait Extractor {
    fn name(&self) -> &'static str;

    fn extract(&self, source: &Path) -> Result<Extraction, ExtractError>;

    /// Reads document metadata without extracting any text.
    fn metadata(&self, source: &Path) -> Result<DocumentMetadata, ExtractError>;

    /// Cheap probe: would this engine accept the document at all? The
    /// full extraction can still fail later (for instance on a document
    /// with no text).
    fn validate(&self, source: &Path) -> bool;
}

/// Builds the extractor for an engine choice.
pub fn build(choice: EngineChoice) -> Box<dyn Extractor> {
    match choice {
        EngineChoice::Object => Box::new(ObjectModelExtractor),
        EngineChoice::Scan => Box::new(StreamScanExtractor),
        EngineChoice::Auto => Box::new(AutoExtractor),
    }
}
