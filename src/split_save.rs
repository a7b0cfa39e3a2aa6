//! Split-save: write an edited merged tree back into its owning files
//!
//! Every target file is generated, re-parsed and validated before the first
//! write. Any error leaves every file untouched.

use crate::codec;
use crate::config::{ConflictPolicy, PlanConfig};
use crate::error::{PlanIssue, Rule, Severity, StoreError, ValidationIssue};
use crate::plan::{Document, Entry, ImportDirective, Node};
use crate::provenance::{ImportRecord, ImportState, ProvenanceMap};
use crate::storage::{FileStore, with_timeout};
use crate::validation::{self, ValidationOptions};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outcome of a split-save
#[derive(Debug, Clone, Default)]
pub struct SaveReport {
    pub written_files: Vec<PathBuf>,
    /// Files whose generated content matched what was on disk
    pub unchanged_files: Vec<PathBuf>,
    pub backups: Vec<PathBuf>,
    pub errors: Vec<PlanIssue>,
    pub warnings: Vec<PlanIssue>,
}

impl SaveReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Path of the backup kept for `path`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".bak");
    PathBuf::from(name)
}

/// `src` that reaches `target` from a file in `from_dir`
pub fn relative_src(from_dir: &Path, target: &Path) -> String {
    let from: Vec<Component> = from_dir.components().collect();
    let to: Vec<Component> = target.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from.len() {
        parts.push("..".to_string());
    }
    for component in &to[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }
    parts.join("/")
}

/// The file a node goes to, given where its parent went
fn target_of(node: &Node, parent_id: Option<&str>, parent_target: &Path, provenance: &ProvenanceMap) -> PathBuf {
    match provenance.origin(&node.id) {
        // New nodes belong to the file they were inserted into
        None => parent_target.to_path_buf(),
        Some(origin) if origin.parent.as_deref() != parent_id => parent_target.to_path_buf(),
        Some(origin) if origin.boundary && provenance.contains_file(&origin.file) => origin.file.clone(),
        Some(_) => parent_target.to_path_buf(),
    }
}

struct Partition<'a> {
    provenance: &'a ProvenanceMap,
    outputs: BTreeMap<PathBuf, Vec<Entry>>,
    /// Files that already received a directive
    imported: HashSet<PathBuf>,
    /// File each placed node ended up in
    placed: HashMap<String, PathBuf>,
    /// Import edges between output files
    edges: BTreeSet<(PathBuf, PathBuf)>,
    warnings: Vec<PlanIssue>,
}

impl<'a> Partition<'a> {
    fn new(provenance: &'a ProvenanceMap) -> Self {
        let mut outputs = BTreeMap::new();
        outputs.insert(provenance.root().to_path_buf(), Vec::new());
        for file in provenance.files() {
            outputs.insert(file.to_path_buf(), Vec::new());
        }
        Self {
            provenance,
            outputs,
            imported: HashSet::new(),
            placed: HashMap::new(),
            edges: BTreeSet::new(),
            warnings: Vec::new(),
        }
    }

    /// `src` for a directive from `importer` to `target`, reusing a recorded one
    fn src_for(&self, importer: &Path, target: &Path) -> String {
        self.provenance
            .imports()
            .iter()
            .find(|r| r.importer == importer && r.target == target)
            .map(|r| r.src.clone())
            .unwrap_or_else(|| {
                relative_src(importer.parent().unwrap_or_else(|| Path::new("")), target)
            })
    }

    fn place_node(&mut self, node: &Node, target: &Path) -> Entry {
        self.placed
            .entry(node.id.clone())
            .or_insert_with(|| target.to_path_buf());
        let mut copy = Node {
            children: Vec::new(),
            ..node.clone()
        };
        copy.children = self.build(&node.children, Some(&node.id), target);
        Entry::Node(copy)
    }

    /// Lay out one child list of the edited tree owned by `file`
    fn build(&mut self, entries: &[Entry], parent_id: Option<&str>, file: &Path) -> Vec<Entry> {
        let mut out = Vec::with_capacity(entries.len());
        let mut i = 0;
        while i < entries.len() {
            let node = match &entries[i] {
                Entry::Import(directive) => {
                    out.push(Entry::Import(directive.clone()));
                    i += 1;
                    continue;
                }
                Entry::Node(node) => node,
            };

            let target = target_of(node, parent_id, file, self.provenance);
            if target == file {
                out.push(self.place_node(node, file));
                i += 1;
                continue;
            }

            // Consecutive siblings going to the same foreign file share one directive
            let mut run = Vec::new();
            while let Some(Entry::Node(next)) = entries.get(i) {
                if target_of(next, parent_id, file, self.provenance) != target {
                    break;
                }
                run.push(next);
                i += 1;
            }

            if self.imported.insert(target.clone()) {
                let src = self.src_for(file, &target);
                out.push(Entry::Import(ImportDirective::new(src)));
                self.edges.insert((file.to_path_buf(), target.clone()));
            } else {
                warn!(file = %target.display(), "file is imported from more than one place");
                self.warnings.push(PlanIssue::Notice {
                    file: target.clone(),
                    message: format!(
                        "nodes under '{}' were moved to the end of the file because it is already imported elsewhere",
                        parent_id.unwrap_or("(top level)")
                    ),
                });
            }

            let placed: Vec<Entry> = run.into_iter().map(|n| self.place_node(n, &target)).collect();
            self.outputs.entry(target).or_default().extend(placed);
        }
        out
    }

    /// Put back directives that no longer have nodes behind them
    fn reinsert(&mut self, record: &ImportRecord) {
        if record.state == ImportState::Resolved && self.imported.contains(&record.target) {
            return;
        }

        let host = match &record.parent {
            None => record.importer.clone(),
            Some(parent) => match self.placed.get(parent) {
                Some(file) => file.clone(),
                None => {
                    debug!(src = %record.src, parent = %parent, "dropping import of removed node");
                    self.warnings.push(PlanIssue::Notice {
                        file: record.importer.clone(),
                        message: format!(
                            "import '{}' was dropped because node '{}' was removed",
                            record.src, parent
                        ),
                    });
                    return;
                }
            },
        };
        let src = if host == record.importer {
            record.src.clone()
        } else {
            relative_src(host.parent().unwrap_or_else(|| Path::new("")), &record.target)
        };

        let Some(host_entries) = self.outputs.get_mut(&host) else {
            return;
        };
        let mut document = Document {
            entries: std::mem::take(host_entries),
            ..Document::default()
        };
        let list = match &record.parent {
            None => Some(&mut document.entries),
            Some(parent) => document.find_mut(parent).map(|n| &mut n.children),
        };
        if let Some(list) = list {
            let position = match record
                .anchor
                .as_deref()
                .and_then(|anchor| list.iter().position(|e| e.as_node().is_some_and(|n| n.id == anchor)))
            {
                Some(found) => {
                    let mut position = found + 1;
                    while matches!(list.get(position), Some(Entry::Import(_))) {
                        position += 1;
                    }
                    position
                }
                None => record.index.min(list.len()),
            };
            list.insert(position, Entry::Import(ImportDirective::new(src)));
        }
        if let Some(host_entries) = self.outputs.get_mut(&host) {
            *host_entries = document.entries;
        }

        if record.state == ImportState::Resolved {
            self.imported.insert(record.target.clone());
            self.edges.insert((host, record.target.clone()));
        }
    }
}

/// First import loop in `edges`, as a file chain closing on itself
fn find_import_loop(edges: &BTreeSet<(PathBuf, PathBuf)>) -> Option<Vec<PathBuf>> {
    let mut graph: BTreeMap<&Path, Vec<&Path>> = BTreeMap::new();
    for (from, to) in edges {
        graph.entry(from.as_path()).or_default().push(to.as_path());
    }

    fn visit<'g>(
        node: &'g Path,
        graph: &BTreeMap<&'g Path, Vec<&'g Path>>,
        stack: &mut Vec<&'g Path>,
        done: &mut HashSet<&'g Path>,
    ) -> Option<Vec<PathBuf>> {
        if let Some(start) = stack.iter().position(|p| *p == node) {
            let mut chain: Vec<PathBuf> = stack[start..].iter().map(|p| p.to_path_buf()).collect();
            chain.push(node.to_path_buf());
            return Some(chain);
        }
        if !done.insert(node) {
            return None;
        }
        stack.push(node);
        for next in graph.get(node).into_iter().flatten() {
            if let Some(chain) = visit(next, graph, stack, done) {
                return Some(chain);
            }
        }
        stack.pop();
        None
    }

    let mut done = HashSet::new();
    for start in graph.keys() {
        let mut stack = Vec::new();
        if let Some(chain) = visit(start, &graph, &mut stack, &mut done) {
            return Some(chain);
        }
    }
    None
}

struct Prepared {
    path: PathBuf,
    content: String,
    previous: Option<String>,
}

/// Partition an edited merged tree and write every owning file
///
/// # Arguments
/// * `store` - Where files are written
/// * `document` - The edited merged tree
/// * `provenance` - Provenance captured when the tree was resolved
/// * `config` - Timeout, backup, conflict and validation settings
///
/// # Returns
/// A report; when `errors` is non-empty no file was modified
pub async fn split_save(
    store: &dyn FileStore,
    document: &Document,
    provenance: &ProvenanceMap,
    config: &PlanConfig,
) -> SaveReport {
    let mut report = SaveReport::default();
    let options = config.validation_options();
    let root = provenance.root().to_path_buf();

    // A root missing from the provenance either failed to load or does not exist yet
    if !provenance.contains_file(&root) {
        match with_timeout(&root, config.io_timeout(), store.modified(&root)).await {
            Ok(None) => debug!(root = %root.display(), "root file will be created"),
            Ok(Some(_)) => {
                warn!(root = %root.display(), "refusing to overwrite a root that was not loaded");
                report.errors.push(PlanIssue::NotLoaded { file: root });
                return report;
            }
            Err(err) => {
                report.errors.push(PlanIssue::store(&root, &err));
                return report;
            }
        }
    }

    let mut partition = Partition::new(provenance);
    let top = partition.build(&document.entries, None, &root);
    partition.outputs.entry(root.clone()).or_default().splice(0..0, top);
    for record in provenance.imports() {
        partition.reinsert(record);
    }
    report.warnings.append(&mut partition.warnings);

    if let Some(chain) = find_import_loop(&partition.edges) {
        report.errors.push(PlanIssue::ImportLoop { chain });
        return report;
    }

    let generated = generate(&partition.outputs, &options, &mut report);
    cross_file_duplicates(document, &generated, &mut report);
    if !report.errors.is_empty() {
        warn!(errors = report.errors.len(), "save aborted before writing");
        return report;
    }

    let prepared = prepare(store, generated, provenance, config, &mut report).await;
    if !report.errors.is_empty() {
        warn!(errors = report.errors.len(), "save aborted before writing");
        return report;
    }

    let timeout = config.io_timeout();
    for file in prepared {
        if file.previous.as_deref() == Some(file.content.as_str()) {
            report.unchanged_files.push(file.path);
            continue;
        }
        if config.backup
            && let Some(previous) = &file.previous
        {
            let backup = backup_path(&file.path);
            match with_timeout(&backup, timeout, store.write(&backup, previous)).await {
                Ok(()) => report.backups.push(backup),
                Err(err) => {
                    report.errors.push(PlanIssue::store(&backup, &err));
                    break;
                }
            }
        }
        match with_timeout(&file.path, timeout, store.write(&file.path, &file.content)).await {
            Ok(()) => report.written_files.push(file.path),
            Err(err) => {
                // Files already written stay written
                report.errors.push(PlanIssue::store(&file.path, &err));
                break;
            }
        }
    }

    info!(
        written = report.written_files.len(),
        unchanged = report.unchanged_files.len(),
        errors = report.errors.len(),
        "split-save finished"
    );
    report
}

/// Serialize, re-parse and validate every output file
fn generate(
    outputs: &BTreeMap<PathBuf, Vec<Entry>>,
    options: &ValidationOptions,
    report: &mut SaveReport,
) -> Vec<(PathBuf, String, HashSet<String>)> {
    let mut generated = Vec::new();
    for (path, entries) in outputs {
        let document = Document {
            entries: entries.clone(),
            ..Document::default()
        };
        let content = match codec::encode_file(path, &document) {
            Ok(content) => content,
            Err(err) => {
                report.errors.push(PlanIssue::Sanitization {
                    file: path.clone(),
                    message: err.to_string(),
                });
                continue;
            }
        };
        let parsed = match codec::decode_file(path, &content) {
            Ok(parsed) => parsed,
            Err(err) => {
                report.errors.push(PlanIssue::Sanitization {
                    file: path.clone(),
                    message: err.to_string(),
                });
                continue;
            }
        };
        if parsed.ids() != document.ids() {
            report.errors.push(PlanIssue::Sanitization {
                file: path.clone(),
                message: "re-parsed output does not match the generated nodes".to_string(),
            });
            continue;
        }

        let checked = validation::validate_with(&parsed, Some(path), options);
        let local_duplicates = checked
            .errors
            .iter()
            .filter(|i| i.rule == Rule::DuplicateId)
            .filter_map(|i| i.node_id.clone())
            .collect();
        report
            .errors
            .extend(checked.errors.into_iter().map(PlanIssue::Validation));
        report
            .warnings
            .extend(checked.warnings.into_iter().map(PlanIssue::Validation));
        debug!(path = %path.display(), bytes = content.len(), "generated plan file");
        generated.push((path.clone(), content, local_duplicates));
    }
    generated
}

fn cross_file_duplicates(
    document: &Document,
    generated: &[(PathBuf, String, HashSet<String>)],
    report: &mut SaveReport,
) {
    let reported: HashSet<&String> = generated.iter().flat_map(|(_, _, ids)| ids).collect();
    for (id, count) in validation::duplicate_ids(document) {
        if reported.contains(&id) {
            continue;
        }
        report.errors.push(PlanIssue::Validation(ValidationIssue {
            severity: Severity::Error,
            rule: Rule::DuplicateId,
            file: None,
            node_id: Some(id.clone()),
            message: format!("id '{}' is used by {} nodes across files", id, count),
        }));
    }
}

/// Whether every composed file still carries the stamp taken when it was loaded
pub async fn provenance_is_current(store: &dyn FileStore, provenance: &ProvenanceMap, timeout: Duration) -> bool {
    for path in provenance.files() {
        match with_timeout(path, timeout, store.modified(path)).await {
            Ok(stamp) if stamp == provenance.stamp(path) => {}
            _ => return false,
        }
    }
    true
}

/// Check for external edits and read the current content of each file
async fn prepare(
    store: &dyn FileStore,
    generated: Vec<(PathBuf, String, HashSet<String>)>,
    provenance: &ProvenanceMap,
    config: &PlanConfig,
    report: &mut SaveReport,
) -> Vec<Prepared> {
    let timeout = config.io_timeout();
    let mut prepared = Vec::with_capacity(generated.len());
    for (path, content, _) in generated {
        if provenance.contains_file(&path) {
            match with_timeout(&path, timeout, store.modified(&path)).await {
                Ok(current) if current != provenance.stamp(&path) => match config.conflict_policy {
                    ConflictPolicy::Abort => {
                        report.errors.push(PlanIssue::Conflict { file: path.clone() });
                        continue;
                    }
                    ConflictPolicy::Overwrite => {
                        warn!(path = %path.display(), "overwriting a file changed on disk");
                    }
                },
                Ok(_) => {}
                Err(err) => {
                    report.errors.push(PlanIssue::store(&path, &err));
                    continue;
                }
            }
        }

        let previous = match with_timeout(&path, timeout, store.read(&path)).await {
            Ok(text) => Some(text),
            Err(StoreError::NotFound(_)) => None,
            Err(err) => {
                report.errors.push(PlanIssue::store(&path, &err));
                continue;
            }
        };
        prepared.push(Prepared {
            path,
            content,
            previous,
        });
    }
    prepared
}

/// Target file of every node in an edited tree, as split-save would place it
pub fn plan_targets(document: &Document, provenance: &ProvenanceMap) -> HashMap<String, PathBuf> {
    fn walk(
        entries: &[Entry],
        parent_id: Option<&str>,
        parent_target: &Path,
        provenance: &ProvenanceMap,
        out: &mut HashMap<String, PathBuf>,
    ) {
        for node in entries.iter().filter_map(Entry::as_node) {
            let target = target_of(node, parent_id, parent_target, provenance);
            walk(&node.children, Some(&node.id), &target, provenance, out);
            out.entry(node.id.clone()).or_insert(target);
        }
    }
    let mut out = HashMap::new();
    walk(&document.entries, None, provenance.root(), provenance, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::NodeOrigin;

    #[test]
    fn test_relative_src() {
        assert_eq!(relative_src(Path::new("/p"), Path::new("/p/mod.xml")), "mod.xml");
        assert_eq!(relative_src(Path::new("/p/a"), Path::new("/p/b/m.xml")), "../b/m.xml");
        assert_eq!(relative_src(Path::new("/p/a/b"), Path::new("/p/m.json")), "../../m.json");
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(backup_path(Path::new("/p/root.xml")), PathBuf::from("/p/root.xml.bak"));
    }

    fn provenance() -> ProvenanceMap {
        let mut map = ProvenanceMap::new("/p/root.xml");
        map.record_file("/p/root.xml", None);
        map.record_file("/p/mod.xml", None);
        let origin = |file: &str, parent: Option<&str>, boundary| NodeOrigin {
            file: PathBuf::from(file),
            parent: parent.map(str::to_string),
            boundary,
        };
        map.record_node("r", origin("/p/root.xml", None, true));
        map.record_node("m", origin("/p/mod.xml", Some("r"), true));
        map.record_node("c", origin("/p/mod.xml", Some("m"), false));
        map
    }

    #[test]
    fn test_targets_follow_ownership_rules() {
        let map = provenance();
        // Unmoved: m stays in mod.xml and c follows it, new n inherits mod.xml
        let doc = Document::with_nodes([Node::new("r", "R").with_child(
            Node::new("m", "M")
                .with_child(Node::new("c", "C"))
                .with_child(Node::new("n", "N")),
        )]);
        let targets = plan_targets(&doc, &map);
        assert_eq!(targets["r"], PathBuf::from("/p/root.xml"));
        assert_eq!(targets["m"], PathBuf::from("/p/mod.xml"));
        assert_eq!(targets["c"], PathBuf::from("/p/mod.xml"));
        assert_eq!(targets["n"], PathBuf::from("/p/mod.xml"));

        // Moving c under r transfers it to root.xml
        let doc = Document::with_nodes([Node::new("r", "R")
            .with_child(Node::new("m", "M"))
            .with_child(Node::new("c", "C"))]);
        let targets = plan_targets(&doc, &map);
        assert_eq!(targets["c"], PathBuf::from("/p/root.xml"));
    }

    #[test]
    fn test_import_loop_detection() {
        let mut edges = BTreeSet::new();
        edges.insert((PathBuf::from("/p/a.xml"), PathBuf::from("/p/b.xml")));
        assert!(find_import_loop(&edges).is_none());
        edges.insert((PathBuf::from("/p/b.xml"), PathBuf::from("/p/a.xml")));
        let chain = find_import_loop(&edges).unwrap();
        assert_eq!(chain.first(), chain.last());
        assert_eq!(chain.len(), 3);
    }
}
