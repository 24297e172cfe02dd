//! Unit-operation source blocks — header recognition and section extraction.
//!
//! A lab-note workflow document is a sequence of unit-operation blocks:
//!
//! ```text
//! ### [UHW010 Liquid Handling]
//!
//! #### Input
//! - 2 mL overnight culture
//!
//! #### Method
//! - (method used in this step)
//! ------------------------------------------------------------------------
//! ```
//!
//! Headings may arrive with backslash-escaped brackets (`### \[UHW010 ...\]`)
//! when the markdown was round-tripped through an editor.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder used for absent or template-only section content.
pub const NOT_SPECIFIED: &str = "(not specified)";

/// Line that closes a unit-operation block.
pub const BLOCK_TERMINATOR: &str =
    "------------------------------------------------------------------------";

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"### \\?\[(U[A-Z]{2,3}\d{3,4}) (.*?)\\?\]").expect("static header regex")
});

static ANY_UNIT_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"### \\?\[U[A-Z]{2,3}\d{3}").expect("static heading regex"));

/// Errors from source-block parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceBlockError {
    #[error("no `### [CODE Name]` heading found in source block")]
    MissingHeader,

    #[error("unit operation block for `{id}` not found")]
    UnitNotFound { id: String },
}

/// Identity of a unit operation, taken from its block heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitOperation {
    /// Code such as `UHW010` or `USW340`.
    pub id: String,
    /// Human-readable name following the code.
    pub name: String,
}

impl std::fmt::Display for UnitOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.id, self.name)
    }
}

/// Parse the first `### [CODE Name]` heading in a block.
pub fn parse_header(block: &str) -> Result<UnitOperation, SourceBlockError> {
    let caps = HEADER_RE
        .captures(block)
        .ok_or(SourceBlockError::MissingHeader)?;
    Ok(UnitOperation {
        id: caps[1].to_string(),
        name: caps[2].to_string(),
    })
}

/// Extract the content of `#### <name>` from a block.
///
/// The section ends at the next `####` heading, the block terminator line,
/// or the end of the block, whichever comes first. Missing sections, empty
/// sections, and template placeholders (content starting with `(`) all
/// yield [`NOT_SPECIFIED`].
pub fn extract_section(block: &str, name: &str) -> String {
    let marker = format!("#### {name}\n");
    let Some(start) = block.find(&marker) else {
        return NOT_SPECIFIED.to_string();
    };
    let body = &block[start + marker.len()..];

    let next_heading = body.find("\n####");
    let terminator = body.find(&format!("\n{BLOCK_TERMINATOR}"));
    let end = match (next_heading, terminator) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => body.len(),
    };

    let content = body[..end].trim();
    if content.is_empty() || content.starts_with('(') {
        NOT_SPECIFIED.to_string()
    } else {
        content.to_string()
    }
}

/// Locate the block for `unit_id` inside a whole workflow document.
///
/// The returned slice starts at the unit's heading and runs up to the next
/// unit heading or the end of the document.
pub fn find_unit_block<'a>(document: &'a str, unit_id: &str) -> Result<&'a str, SourceBlockError> {
    let pattern = format!(
        r"### \\?\[{}(?: [^\n]*?)?\\?\](?:\r?\n|$)",
        regex::escape(unit_id)
    );
    let heading = Regex::new(&pattern).map_err(|_| SourceBlockError::UnitNotFound {
        id: unit_id.to_string(),
    })?;

    let found = heading
        .find(document)
        .ok_or_else(|| SourceBlockError::UnitNotFound {
            id: unit_id.to_string(),
        })?;

    let rest = &document[found.end()..];
    let end = ANY_UNIT_HEADING_RE
        .find(rest)
        .map(|m| found.end() + m.start())
        .unwrap_or(document.len());

    Ok(&document[found.start()..end])
}
