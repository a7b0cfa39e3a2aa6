//! Which file each node of a merged tree came from
//!
//! Captured by the resolver and consumed by the partitioner. Nothing in here
//! is ever written into a plan file.

use crate::storage::FileStamp;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Where a node was textually defined at load time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOrigin {
    pub file: PathBuf,
    /// Parent id in the merged tree, `None` at top level
    pub parent: Option<String>,
    /// Top-level node of its own file
    pub boundary: bool,
}

/// How an import directive fared during resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportState {
    Resolved,
    Missing,
    Malformed,
    Cyclic,
    TooDeep,
}

/// An `<import>` directive as it appeared in its importing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub importer: PathBuf,
    /// Node whose children held the directive, `None` at top level
    pub parent: Option<String>,
    /// Last node preceding the directive in the same child list
    pub anchor: Option<String>,
    /// Position in the importing file's child list
    pub index: usize,
    /// `src` exactly as written
    pub src: String,
    /// Normalized target path
    pub target: PathBuf,
    pub state: ImportState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceMap {
    root: PathBuf,
    nodes: HashMap<String, NodeOrigin>,
    files: BTreeMap<PathBuf, Option<FileStamp>>,
    imports: Vec<ImportRecord>,
}

impl ProvenanceMap {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record a node; the first definition of an id wins
    pub fn record_node(&mut self, id: impl Into<String>, origin: NodeOrigin) {
        let id = id.into();
        if id.is_empty() {
            return;
        }
        self.nodes.entry(id).or_insert(origin);
    }

    /// Record a composed file with the stamp taken when it was read
    pub fn record_file(&mut self, path: impl Into<PathBuf>, stamp: Option<FileStamp>) {
        self.files.insert(path.into(), stamp);
    }

    pub fn record_import(&mut self, record: ImportRecord) {
        self.imports.push(record);
    }

    pub fn origin(&self, id: &str) -> Option<&NodeOrigin> {
        self.nodes.get(id)
    }

    /// The file a node is defined in
    pub fn source_file(&self, id: &str) -> Option<&Path> {
        self.nodes.get(id).map(|origin| origin.file.as_path())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Ids defined in `file`, sorted
    pub fn nodes_in(&self, file: &Path) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .nodes
            .iter()
            .filter(|(_, origin)| origin.file == file)
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Files that were read and parsed, in path order
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn stamp(&self, path: &Path) -> Option<FileStamp> {
        self.files.get(path).copied().flatten()
    }

    pub fn imports(&self) -> &[ImportRecord] {
        &self.imports
    }
}
