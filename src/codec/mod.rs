//! Plan file codecs
//!
//! A plan file is either XML (`<project_plan>`) or its JSON mirror
//! (`{"type": "project_plan", ...}`); the file extension decides which.

mod json;
mod xml;

use crate::plan::Document;
use crate::sanitizer::SanitizeError;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid XML: {0}")]
    Xml(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Sanitize(#[from] SanitizeError),
}

/// On-disk representation of a plan file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Xml,
    Json,
}

impl Format {
    /// Pick the format from the file extension (`.json` or anything else for XML)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
            _ => Format::Xml,
        }
    }

    pub fn decode(self, text: &str) -> Result<Document, CodecError> {
        match self {
            Format::Xml => xml::decode(text),
            Format::Json => json::decode(text),
        }
    }

    pub fn encode(self, document: &Document) -> Result<String, CodecError> {
        match self {
            Format::Xml => xml::encode(document),
            Format::Json => json::encode(document),
        }
    }
}

/// Decode a plan file, choosing the codec from its path
pub fn decode_file(path: &Path, text: &str) -> Result<Document, CodecError> {
    Format::from_path(path).decode(text)
}

/// Encode a plan file, choosing the codec from its path
pub fn encode_file(path: &Path, document: &Document) -> Result<String, CodecError> {
    Format::from_path(path).encode(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_path() {
        assert_eq!(Format::from_path(Path::new("a/b.json")), Format::Json);
        assert_eq!(Format::from_path(Path::new("a/b.JSON")), Format::Json);
        assert_eq!(Format::from_path(Path::new("a/b.xml")), Format::Xml);
        assert_eq!(Format::from_path(Path::new("a/plan")), Format::Xml);
    }
}
