//! Result rendering: turns an [`Extraction`] into the requested output
//! document.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extract::Extraction;

/// Output document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Json,
    Yaml,
    Text,
}

impl OutputFormat {
    /// File extension for result files, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Markdown => "md",
            OutputFormat::Json => "json",
            OutputFormat::Yaml => "yaml",
            OutputFormat::Text => "txt",
        }
    }
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("JSON rendering failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML rendering failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Renders an extraction in the requested format.
///
/// `include_metadata` controls the frontmatter in Markdown and the
/// metadata sections in the structured formats; the plain-text format
/// never carries metadata.
pub fn render(
    extraction: &Extraction,
    format: OutputFormat,
    include_metadata: bool,
) -> Result<String, FormatError> {
    match format {
        OutputFormat::Markdown => Ok(render_markdown(extraction, include_metadata)),
        OutputFormat::Json => render_json(extraction, include_metadata),
        OutputFormat::Yaml => render_yaml(extraction, include_metadata),
        OutputFormat::Text => Ok(render_text(extraction)),
    }
}

fn render_markdown(extraction: &Extraction, include_metadata: bool) -> String {
    let mut out = String::new();

    if include_metadata {
        out.push_str("---\n");
        if let Some(ref title) = extraction.metadata.title {
            out.push_str(&format!("title: {}\n", yaml_scalar(title)));
        }
        if let Some(ref author) = extraction.metadata.author {
            out.push_str(&format!("author: {}\n", yaml_scalar(author)));
        }
        if let Some(ref subject) = extraction.metadata.subject {
            out.push_str(&format!("subject: {}\n", yaml_scalar(subject)));
        }
        out.push_str(&format!("pages: {}\n", extraction.metadata.page_count));
        out.push_str(&format!("engine: {}\n", extraction.engine));
        out.push_str("---\n\n");
    }

    if let Some(ref title) = extraction.metadata.title {
        out.push_str(&format!("# {}\n\n", title));
    }

    for page in &extraction.pages {
        if extraction.pages.len() > 1 {
            out.push_str(&format!("## Page {}\n\n", page.number));
        }
        let body = page.text.trim();
        if !body.is_empty() {
            out.push_str(body);
            out.push_str("\n\n");
        }
    }

    out.trim_end().to_string() + "\n"
}

/// Quotes a scalar for YAML frontmatter when it contains characters
/// that would change its meaning unquoted.
fn yaml_scalar(value: &str) -> String {
    if value.contains(|c: char| matches!(c, ':' | '#' | '"' | '\'' | '\n')) {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[derive(Serialize)]
struct StructuredResult<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a crate::extract::DocumentMetadata>,
    engine: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: &'a Vec<String>,
    pages: &'a Vec<crate::extract::Page>,
}

impl<'a> StructuredResult<'a> {
    fn new(extraction: &'a Extraction, include_metadata: bool) -> Self {
        Self {
            metadata: include_metadata.then_some(&extraction.metadata),
            engine: &extraction.engine,
            warnings: &extraction.warnings,
            pages: &extraction.pages,
        }
    }
}

fn render_json(extraction: &Extraction, include_metadata: bool) -> Result<String, FormatError> {
    let mut out = serde_json::to_string_pretty(&StructuredResult::new(extraction, include_metadata))?;
    out.push('\n');
    Ok(out)
}

fn render_yaml(extraction: &Extraction, include_metadata: bool) -> Result<String, FormatError> {
    Ok(serde_yaml::to_string(&StructuredResult::new(
        extraction,
        include_metadata,
    ))?)
}

fn render_text(extraction: &Extraction) -> String {
    let mut out = String::new();
    for page in &extraction.pages {
        let body = page.text.trim();
        if !body.is_empty() {
            out.push_str(body);
            out.push_str("\n\n");
        }
    }
    out.trim_end().to_string() + "\n"
}
