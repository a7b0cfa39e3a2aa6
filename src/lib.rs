//! Mind-map project plans split across files
//!
//! A plan is a tree of typed nodes stored as XML (or its JSON mirror). Large
//! plans are split into several files joined by `<import src="..."/>`
//! directives. This library composes those files into one merged tree, tracks
//! which file every node came from, and writes an edited tree back into the
//! files that own each part.
//!
//! # Architecture
//!
//! - **Facade**: `PlanWorkspace` - Loaded plan, editing and saving
//! - **Domain Layer**: `plan` module - Nodes, documents, ids
//! - **Composition**: `resolver`, `provenance`, `split_save`, `save_queue`
//! - **Safety**: `sanitizer`, `validation`
//! - **Persistence Layer**: `codec` and `storage` - File formats and file access
//!
//! # Example
//!
//! ```no_run
//! use mindplan::{FsStore, PlanConfig, PlanWorkspace};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let workspace = PlanWorkspace::open(Arc::new(FsStore::new()), "plan.xml", PlanConfig::default()).await;
//! let id = workspace.add_node(None, "Write release notes")?;
//! let report = workspace.save().await;
//! assert!(report.is_success(), "{}", id);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod formatting;
pub mod plan;
pub mod provenance;
pub mod resolver;
pub mod sanitizer;
pub mod save_queue;
pub mod split_save;
pub mod storage;
pub mod validation;

use anyhow::{Result, bail};
use crate::split_save::provenance_is_current;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

// Re-export commonly used types
pub use config::{ConflictPolicy, PlanConfig};
pub use error::{PlanIssue, Severity, StoreError, ValidationIssue};
pub use plan::{CodeBlock, Document, Entry, ImportDirective, Node, Priority, Status};
pub use provenance::{ImportRecord, ImportState, NodeOrigin, ProvenanceMap};
pub use resolver::{Resolution, resolve};
pub use save_queue::SaveQueue;
pub use split_save::{SaveReport, split_save};
pub use storage::{FileStamp, FileStore, FsStore, MemoryStore};
pub use validation::{ValidationReport, validate};

struct WorkspaceState {
    document: Document,
    provenance: ProvenanceMap,
    errors: Vec<PlanIssue>,
    warnings: Vec<PlanIssue>,
    /// Bumped on every change to `document`
    edits: u64,
}

impl WorkspaceState {
    fn from_resolution(resolution: Resolution) -> Self {
        Self {
            document: resolution.document,
            provenance: resolution.provenance,
            errors: resolution.errors,
            warnings: resolution.warnings,
            edits: 0,
        }
    }

    /// Take the provenance and findings of a fresh load, keeping the document
    fn adopt(&mut self, resolution: Resolution) {
        self.provenance = resolution.provenance;
        self.errors = resolution.errors;
        self.warnings = resolution.warnings;
    }
}

/// Load-time findings of the current workspace state
#[derive(Debug, Clone, Default)]
pub struct WorkspaceReport {
    pub errors: Vec<PlanIssue>,
    pub warnings: Vec<PlanIssue>,
    pub node_count: usize,
    pub files: Vec<PathBuf>,
}

/// A loaded plan that can be edited and saved back into its files
///
/// Holds the merged tree and the provenance captured when it was resolved.
/// Every successful save re-resolves the plan so the provenance describes
/// the files as they now are. Edits made while a save is running are kept.
pub struct PlanWorkspace {
    store: Arc<dyn FileStore>,
    config: PlanConfig,
    root: PathBuf,
    state: Mutex<WorkspaceState>,
}

impl PlanWorkspace {
    /// Open a plan
    ///
    /// # Arguments
    /// * `store` - File access used for loading and saving
    /// * `root` - Root plan file
    /// * `config` - Engine configuration
    ///
    /// # Returns
    /// The workspace; load problems are available from [`PlanWorkspace::report`]
    pub async fn open(store: Arc<dyn FileStore>, root: impl AsRef<Path>, config: PlanConfig) -> Self {
        let root = resolver::normalize_path(root.as_ref());
        let resolution = resolve(store.as_ref(), &root, &config).await;
        Self {
            store,
            config,
            root,
            state: Mutex::new(WorkspaceState::from_resolution(resolution)),
        }
    }

    fn state(&self) -> MutexGuard<'_, WorkspaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &PlanConfig {
        &self.config
    }

    /// Snapshot of the merged tree
    pub fn document(&self) -> Document {
        self.state().document.clone()
    }

    /// Snapshot of the provenance map
    pub fn provenance(&self) -> ProvenanceMap {
        self.state().provenance.clone()
    }

    /// Apply an edit to the merged tree
    pub fn edit<R>(&self, edit: impl FnOnce(&mut Document) -> R) -> R {
        let mut state = self.state();
        state.edits += 1;
        edit(&mut state.document)
    }

    /// Add a node with a fresh id
    ///
    /// # Arguments
    /// * `parent_id` - Parent node, or `None` for a top-level node
    /// * `title` - Node title
    ///
    /// # Returns
    /// The id of the new node
    pub fn add_node(&self, parent_id: Option<&str>, title: &str) -> Result<String> {
        let title = title.trim();
        if title.is_empty() {
            bail!("Node title must not be empty");
        }
        let mut state = self.state();
        let id = plan::ids::unused_node_id(&state.document);
        if !state.document.insert_child(parent_id, Node::new(id.clone(), title)) {
            bail!("Parent node '{}' not found", parent_id.unwrap_or_default());
        }
        state.edits += 1;
        Ok(id)
    }

    /// Split-save the merged tree, then reload it
    ///
    /// When the tree was edited while the save ran, only the provenance is
    /// refreshed and the edited tree stays in place.
    pub async fn save(&self) -> SaveReport {
        let (document, provenance, edits) = {
            let state = self.state();
            (state.document.clone(), state.provenance.clone(), state.edits)
        };
        let report = split_save(self.store.as_ref(), &document, &provenance, &self.config).await;
        if report.is_success() {
            let resolution = resolve(self.store.as_ref(), &self.root, &self.config).await;
            let mut state = self.state();
            if state.edits == edits {
                *state = WorkspaceState {
                    edits,
                    ..WorkspaceState::from_resolution(resolution)
                };
            } else {
                debug!(root = %self.root.display(), "keeping edits made during save");
                state.adopt(resolution);
            }
        }
        report
    }

    /// Re-resolve the plan from its files, dropping unsaved edits
    pub async fn reload(&self) {
        let resolution = resolve(self.store.as_ref(), &self.root, &self.config).await;
        let mut state = self.state();
        let edits = state.edits + 1;
        *state = WorkspaceState {
            edits,
            ..WorkspaceState::from_resolution(resolution)
        };
    }

    /// Hand the current tree to a save queue
    ///
    /// # Returns
    /// The generation of the queued snapshot
    pub async fn queue_save(&self, queue: &SaveQueue) -> u64 {
        self.adopt_queued_save(queue).await;
        let state = self.state();
        queue.submit(state.document.clone(), state.provenance.clone())
    }

    /// Take over the provenance of the queue's last save when ours is out of date
    ///
    /// # Returns
    /// Whether the provenance was replaced
    pub async fn adopt_queued_save(&self, queue: &SaveQueue) -> bool {
        let Some(refreshed) = queue.refreshed() else {
            return false;
        };
        if refreshed.provenance.root() != self.root {
            return false;
        }
        let timeout = self.config.io_timeout();
        let current = self.provenance();
        if provenance_is_current(self.store.as_ref(), &current, timeout).await
            || !provenance_is_current(self.store.as_ref(), &refreshed.provenance, timeout).await
        {
            return false;
        }

        let mut state = self.state();
        // A direct save may have refreshed the state in the meantime
        if state.provenance != current {
            return false;
        }
        state.adopt(refreshed);
        true
    }

    pub fn report(&self) -> WorkspaceReport {
        let state = self.state();
        WorkspaceReport {
            errors: state.errors.clone(),
            warnings: state.warnings.clone(),
            node_count: state.document.node_count(),
            files: state.provenance.files().map(Path::to_path_buf).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Store whose writes yield once, so other tasks run in the middle of a save
    struct YieldingStore(MemoryStore);

    #[async_trait]
    impl FileStore for YieldingStore {
        async fn read(&self, path: &Path) -> Result<String, StoreError> {
            self.0.read(path).await
        }

        async fn write(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
            tokio::task::yield_now().await;
            self.0.write(path, contents).await
        }

        async fn modified(&self, path: &Path) -> Result<Option<FileStamp>, StoreError> {
            self.0.modified(path).await
        }
    }

    fn files() -> MemoryStore {
        MemoryStore::new()
            .with_file(
                "/p/root.xml",
                r#"<project_plan version="1.0"><node id="r" title="R"><import src="mod.xml"/></node></project_plan>"#,
            )
            .with_file(
                "/p/mod.xml",
                r#"<project_plan version="1.0"><node id="m" title="M"/></project_plan>"#,
            )
    }

    fn store() -> Arc<MemoryStore> {
        Arc::new(files())
    }

    #[tokio::test]
    async fn test_open_and_report() {
        let workspace = PlanWorkspace::open(store(), "/p/root.xml", PlanConfig::default()).await;
        let report = workspace.report();
        assert!(report.errors.is_empty());
        assert_eq!(report.node_count, 2);
        assert_eq!(report.files.len(), 2);
        assert_eq!(workspace.provenance().source_file("m"), Some(Path::new("/p/mod.xml")));
    }

    #[tokio::test]
    async fn test_add_node_rejects_unknown_parent() {
        let workspace = PlanWorkspace::open(store(), "/p/root.xml", PlanConfig::default()).await;
        assert!(workspace.add_node(Some("nope"), "X").is_err());
        assert!(workspace.add_node(None, "  ").is_err());
        let id = workspace.add_node(Some("m"), "Child").unwrap();
        assert!(workspace.document().find(&id).is_some());
    }

    #[tokio::test]
    async fn test_save_routes_new_node_and_reloads() {
        let store = store();
        let workspace = PlanWorkspace::open(store.clone(), "/p/root.xml", PlanConfig::default()).await;
        let id = workspace.add_node(Some("m"), "Child").unwrap();

        let report = workspace.save().await;
        assert!(report.is_success(), "{:?}", report.errors);
        assert!(store.get("/p/mod.xml").unwrap().contains(&id));
        assert!(!store.get("/p/root.xml").unwrap().contains(&id));
        assert_eq!(workspace.provenance().source_file(&id), Some(Path::new("/p/mod.xml")));
    }

    #[tokio::test]
    async fn test_edit_then_reload_discards_changes() {
        let workspace = PlanWorkspace::open(store(), "/p/root.xml", PlanConfig::default()).await;
        let removed = workspace.edit(|doc| doc.remove("m"));
        assert!(removed.is_some());
        assert!(workspace.document().find("m").is_none());
        workspace.reload().await;
        assert!(workspace.document().find("m").is_some());
    }

    #[tokio::test]
    async fn test_edit_during_save_is_kept() {
        let store = Arc::new(YieldingStore(files()));
        let workspace = PlanWorkspace::open(store.clone(), "/p/root.xml", PlanConfig::default()).await;
        let saved = workspace.add_node(Some("m"), "Saved").unwrap();

        let (report, late) = tokio::join!(workspace.save(), async {
            workspace.add_node(Some("r"), "Added while saving").unwrap()
        });
        assert!(report.is_success(), "{:?}", report.errors);
        assert!(!store.0.get("/p/root.xml").unwrap().contains(&late));

        let document = workspace.document();
        assert!(document.find(&late).is_some());
        assert!(document.find(&saved).is_some());
        assert_eq!(workspace.provenance().source_file(&saved), Some(Path::new("/p/mod.xml")));

        let report = workspace.save().await;
        assert!(report.is_success(), "{:?}", report.errors);
        assert!(store.0.get("/p/root.xml").unwrap().contains(&late));
        assert_eq!(workspace.provenance().source_file(&late), Some(Path::new("/p/root.xml")));
    }
}
