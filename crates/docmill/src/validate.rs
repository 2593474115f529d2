//! Source document validation at submission time.
//!
//! Validation is cheap and happens before a job row exists, so a bad
//! source never reaches the queue. It checks the path, the size cap,
//! and the PDF signature; deeper structural problems are left to the
//! engines, which report them as job failures.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

/// Default cap on source file size.
pub const DEFAULT_MAX_SOURCE_BYTES: u64 = 100 * 1024 * 1024;

const PDF_SIGNATURE: &[u8] = b"%PDF-";

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Source is not a regular file: {0}")]
    NotAFile(String),

    #[error("Source is empty: {0}")]
    Empty(String),

    #[error("Source exceeds the size limit ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("Source is not a PDF document (missing %PDF- signature): {0}")]
    NotAPdf(String),

    #[error("Failed to read source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Validates a source document against the size cap and PDF signature.
pub fn validate_source(path: &Path, max_bytes: u64) -> Result<(), ValidationError> {
    let display = path.display().to_string();

    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ValidationError::NotFound(display));
        }
        Err(e) => {
            return Err(ValidationError::Io {
                path: display,
                source: e,
            });
        }
    };

    if !meta.is_file() {
        return Err(ValidationError::NotAFile(display));
    }
    if meta.len() == 0 {
        return Err(ValidationError::Empty(display));
    }
    if meta.len() > max_bytes {
        return Err(ValidationError::TooLarge {
            size: meta.len(),
            limit: max_bytes,
        });
    }

    let file = File::open(path).map_err(|e| ValidationError::Io {
        path: display.clone(),
        source: e,
    })?;
    // Read at most the signature length; a file shorter than the
    // signature is simply not a PDF, not an I/O failure.
    let mut header = Vec::with_capacity(PDF_SIGNATURE.len());
    file.take(PDF_SIGNATURE.len() as u64)
        .read_to_end(&mut header)
        .map_err(|e| ValidationError::Io {
            path: display.clone(),
            source: e,
        })?;
    if header != PDF_SIGNATURE {
        return Err(ValidationError::NotAPdf(display));
    }

    Ok(())
}
