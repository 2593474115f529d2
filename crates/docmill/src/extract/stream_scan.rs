//! Stream-scan engine: lenient byte-level scan for text operators.
//!
//! Walks the raw file looking for BT..ET text blocks and pulls the
//! literal strings shown inside them. It never parses the document
//! structure, so it survives broken cross-reference tables and other
//! damage that defeats the object-model engine. The trade-offs are
//! real: compressed content streams yield nothing, and without the
//! page tree all text lands on a single synthetic page.

use std::fs;
use std::path::Path;
use std::time::Instant;

use super::{DocumentMetadata, ExtractError, Extraction, Extractor, Page};

pub struct StreamScanExtractor;

impl Extractor for StreamScanExtractor {
    fn name(&self) -> &'static str {
        "stream-scan"
    }

    fn extract(&self, source: &Path) -> Result<Extraction, ExtractError> {
        let started = Instant::now();
        let bytes = fs::read(source)?;

        let text = scan_text_blocks(&bytes);
        if text.trim().is_empty() {
            return Err(ExtractError::NoText);
        }

        Ok(Extraction {
            metadata: DocumentMetadata {
                page_count: 1,
                ..DocumentMetadata::default()
            },
            pages: vec![Page { number: 1, text }],
            engine: self.name().to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            warnings: vec![
                "stream scan cannot recover page boundaries; all text is on one page".to_string(),
            ],
        })
    }

    /// Scans for Info-dictionary keys with literal-string values. Only
    /// uncompressed literals are visible, and the page count stays
    /// unknown without the page tree.
    fn metadata(&self, source: &Path) -> Result<DocumentMetadata, ExtractError> {
        let bytes = fs::read(source)?;
        Ok(DocumentMetadata {
            title: scan_info_entry(&bytes, b"/Title"),
            author: scan_info_entry(&bytes, b"/Author"),
            subject: scan_info_entry(&bytes, b"/Subject"),
            producer: scan_info_entry(&bytes, b"/Producer"),
            page_count: 0,
        })
    }

    /// The scan tolerates structural damage, so the probe only asks for
    /// a readable file with the PDF magic.
    fn validate(&self, source: &Path) -> bool {
        let mut header = [0u8; 5];
        fs::File::open(source)
            .and_then(|mut f| std::io::Read::read_exact(&mut f, &mut header))
            .is_ok()
            && &header[..] == b"%PDF-"
    }
}

/// Collects literal strings shown inside BT..ET blocks. `Tj`/`TJ`/`'`
/// operands all appear as parenthesized literals, so string collection
/// alone covers them.
fn scan_text_blocks(bytes: &[u8]) -> String {
    let mut out = String::new();
    let mut i = 0;
    let mut in_text_block = false;

    while i < bytes.len() {
        if !in_text_block {
            if at_token(bytes, i, b"BT") {
                in_text_block = true;
                i += 2;
                continue;
            }
            i += 1;
            continue;
        }

        if at_token(bytes, i, b"ET") {
            in_text_block = false;
            if !out.ends_with('\n') && !out.is_empty() {
                out.push('\n');
            }
            i += 2;
            continue;
        }

        if bytes[i] == b'(' {
            let (literal, consumed) = read_string_literal(&bytes[i..]);
            out.push_str(&literal);
            i += consumed;
            continue;
        }

        // T* and ' start a new line in the page's text.
        if at_token(bytes, i, b"T*") || bytes[i] == b'\'' {
            if !out.ends_with('\n') && !out.is_empty() {
                out.push('\n');
            }
        }
        i += 1;
    }

    out.trim_end().to_string()
}

/// Finds `key` and returns the parenthesized literal following it, if
/// any. First occurrence wins.
fn scan_info_entry(bytes: &[u8], key: &[u8]) -> Option<String> {
    let mut i = 0;
    while i + key.len() <= bytes.len() {
        if at_token(bytes, i, key) {
            let mut j = i + key.len();
            while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == b'(' {
                let (literal, _) = read_string_literal(&bytes[j..]);
                let trimmed = literal.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        i += 1;
    }
    None
}

/// A token match requires surrounding whitespace or delimiters, so
/// `BT` inside a longer name does not open a block.
fn at_token(bytes: &[u8], i: usize, token: &[u8]) -> bool {
    if !bytes[i..].starts_with(token) {
        return false;
    }
    let before_ok = i == 0 || is_delimiter(bytes[i - 1]);
    let after = i + token.len();
    let after_ok = after >= bytes.len() || is_delimiter(bytes[after]);
    before_ok && after_ok
}

fn is_delimiter(b: u8) -> bool {
    b.is_ascii_whitespace() || matches!(b, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'/')
}

/// Reads a parenthesized string literal starting at `bytes[0] == b'('`.
/// Returns the decoded text and how many input bytes were consumed.
fn read_string_literal(bytes: &[u8]) -> (String, usize) {
    let mut out = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                depth += 1;
                if depth > 1 {
                    out.push('(');
                }
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return (out, i + 1);
                }
                out.push(')');
            }
            b'\\' if i + 1 < bytes.len() => {
                i += 1;
                match bytes[i] {
                    b'n' => out.push('\n'),
                    b'r' => out.push('\r'),
                    b't' => out.push('\t'),
                    b'(' => out.push('('),
                    b')' => out.push(')'),
                    b'\\' => out.push('\\'),
                    // Octal escapes and line continuations are rare in
                    // the literals we care about; pass them through.
                    other => out.push(other as char),
                }
            }
            other => out.push(other as char),
        }
        i += 1;
    }

    // Unterminated literal in a damaged file; keep what we have.
    (out, bytes.len())
}
