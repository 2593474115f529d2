//! Engine chaining: object-model with stream-scan fallback.

use std::path::Path;

use super::{
    DocumentMetadata, ExtractError, Extraction, Extractor, ObjectModelExtractor,
    StreamScanExtractor,
};

pub struct AutoExtractor;

impl Extractor for AutoExtractor {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn extract(&self, source: &Path) -> Result<Extraction, ExtractError> {
        match ObjectModelExtractor.extract(source) {
            Ok(extraction) => Ok(extraction),
            Err(primary) => {
                tracing::warn!(
                    source = %source.display(),
                    error = %primary,
                    "object-model engine failed, trying stream scan"
                );
                let mut extraction = StreamScanExtractor.extract(source).map_err(|_| primary)?;
                extraction
                    .warnings
                    .insert(0, "object-model parse failed; text recovered by stream scan".to_string());
                Ok(extraction)
            }
        }
    }

    fn metadata(&self, source: &Path) -> Result<DocumentMetadata, ExtractError> {
        match ObjectModelExtractor.metadata(source) {
            Ok(metadata) => Ok(metadata),
            Err(primary) => StreamScanExtractor.metadata(source).map_err(|_| primary),
        }
    }

    fn validate(&self, source: &Path) -> bool {
        ObjectModelExtractor.validate(source) || StreamScanExtractor.validate(source)
    }
}
