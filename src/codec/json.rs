use super::CodecError;
use crate::plan::Document;

pub(super) fn decode(text: &str) -> Result<Document, CodecError> {
    Ok(serde_json::from_str(text)?)
}

pub(super) fn encode(document: &Document) -> Result<String, CodecError> {
    let mut out = serde_json::to_string_pretty(document)?;
    out.push('\n');
    Ok(out)
}
