//! Serialization and deserialization implementations for the JSON mirror
//!
//! Node derives its serde impls directly; the child slots and the document
//! envelope need hand-written impls because an import directive is told apart
//! from a node by its `"type": "import"` marker.

use super::document::{Document, FORMAT_VERSION};
use super::node::{Entry, ImportDirective, Node};
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

const IMPORT_TYPE: &str = "import";
const DOCUMENT_TYPE: &str = "project_plan";

impl Serialize for ImportDirective {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", IMPORT_TYPE)?;
        map.serialize_entry("src", &self.src)?;
        map.end()
    }
}

impl Serialize for Entry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Entry::Node(node) => node.serialize(serializer),
            Entry::Import(directive) => directive.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        if !value.is_object() {
            return Err(D::Error::custom("expected a node or import object"));
        }

        if value.get("type").and_then(Value::as_str) == Some(IMPORT_TYPE) {
            // A missing src is kept as empty so the validator can report it
            let src = value
                .get("src")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Entry::Import(ImportDirective { src }));
        }

        Node::deserialize(value)
            .map(Entry::Node)
            .map_err(D::Error::custom)
    }
}

#[derive(Serialize)]
struct DocumentOut<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    version: &'a str,
    nodes: &'a [Entry],
}

#[derive(Deserialize)]
struct DocumentIn {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    nodes: Vec<Entry>,
}

impl Serialize for Document {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        DocumentOut {
            kind: DOCUMENT_TYPE,
            version: &self.version,
            nodes: &self.entries,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let helper = DocumentIn::deserialize(deserializer)?;
        if let Some(kind) = helper.kind.as_deref()
            && kind != DOCUMENT_TYPE
        {
            return Err(D::Error::custom(format!(
                "unexpected document type '{}', expected '{}'",
                kind, DOCUMENT_TYPE
            )));
        }
        Ok(Document {
            version: helper.version.unwrap_or_else(|| FORMAT_VERSION.to_string()),
            entries: helper.nodes,
        })
    }
}
