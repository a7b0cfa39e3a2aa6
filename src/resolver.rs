//! Import resolution: compose one merged tree from a root plan file
//!
//! Loading is best-effort. A missing, malformed or circular import only
//! costs its own branch; everything else is still composed and the problem
//! is reported alongside the tree.

use crate::codec;
use crate::config::PlanConfig;
use crate::error::{PlanIssue, Rule, Severity, StoreError, ValidationIssue};
use crate::plan::{Document, Entry};
use crate::provenance::{ImportRecord, ImportState, NodeOrigin, ProvenanceMap};
use crate::storage::{FileStamp, FileStore, with_timeout};
use crate::validation::{self, ValidationOptions};
use futures::future::{BoxFuture, FutureExt, join_all};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// A merged tree with its provenance and the problems met while loading it
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub document: Document,
    pub provenance: ProvenanceMap,
    pub errors: Vec<PlanIssue>,
    pub warnings: Vec<PlanIssue>,
}

impl Resolution {
    /// Number of files that were read and parsed
    pub fn files_loaded(&self) -> usize {
        self.provenance.files().count()
    }

    pub fn issues(&self) -> impl Iterator<Item = &PlanIssue> {
        self.errors.iter().chain(self.warnings.iter())
    }
}

/// Lexically normalize a path: drop `.`, fold `..` into its parent
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    normalized.components().next_back(),
                    Some(Component::Normal(_))
                ) && normalized.pop();
                if !popped && !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Target of an import `src` written in `importer`
pub fn import_target(importer: &Path, src: &str) -> PathBuf {
    let dir = importer.parent().unwrap_or_else(|| Path::new(""));
    normalize_path(&dir.join(src.trim()))
}

struct Context<'a> {
    store: &'a dyn FileStore,
    config: &'a PlanConfig,
    options: ValidationOptions,
}

/// Everything one file (and the files below it) contributes
#[derive(Default)]
struct Part {
    nodes: Vec<(String, NodeOrigin)>,
    files: Vec<(PathBuf, Option<FileStamp>)>,
    imports: Vec<ImportRecord>,
    errors: Vec<PlanIssue>,
    warnings: Vec<PlanIssue>,
    /// Ids already reported as duplicates inside a single file
    local_duplicates: HashSet<String>,
}

impl Part {
    fn absorb(&mut self, other: Part) {
        self.nodes.extend(other.nodes);
        self.files.extend(other.files);
        self.imports.extend(other.imports);
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.local_duplicates.extend(other.local_duplicates);
    }

    fn push_issue(&mut self, issue: PlanIssue) {
        match issue.severity() {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }
}

enum Failure {
    Unreadable(StoreError),
    Malformed,
}

struct FileLoad {
    outcome: Result<Vec<Entry>, Failure>,
    part: Part,
}

struct ImportJob {
    /// Merged-tree parent for the target's top-level nodes
    attach: Option<String>,
    record: ImportRecord,
}

/// Resolve a root plan file and every file it imports
///
/// # Arguments
/// * `store` - Where files are read from
/// * `root` - Root plan file; normalized before use
/// * `config` - Timeout, depth limit and validation settings
///
/// # Returns
/// The merged tree, its provenance map and all errors and warnings. Never
/// fails as a whole; an unreadable root yields an empty tree plus an error.
pub async fn resolve(store: &dyn FileStore, root: impl AsRef<Path>, config: &PlanConfig) -> Resolution {
    let root = normalize_path(root.as_ref());
    let ctx = Context {
        store,
        config,
        options: config.validation_options(),
    };

    let load = load_file(&ctx, root.clone(), vec![root.clone()], None).await;
    let mut part = load.part;
    let entries = match load.outcome {
        Ok(entries) => entries,
        Err(Failure::Unreadable(err)) => {
            part.errors.push(PlanIssue::store(&root, &err));
            Vec::new()
        }
        Err(Failure::Malformed) => Vec::new(),
    };

    let document = Document {
        entries,
        ..Document::default()
    };

    cross_file_duplicates(&document, &mut part);

    let mut provenance = ProvenanceMap::new(&root);
    for (id, origin) in part.nodes {
        provenance.record_node(id, origin);
    }
    for (path, stamp) in part.files {
        provenance.record_file(path, stamp);
    }
    for record in part.imports {
        provenance.record_import(record);
    }

    info!(
        root = %root.display(),
        files = provenance.files().count(),
        nodes = document.node_count(),
        errors = part.errors.len(),
        warnings = part.warnings.len(),
        "resolved plan"
    );

    Resolution {
        document,
        provenance,
        errors: part.errors,
        warnings: part.warnings,
    }
}

fn cross_file_duplicates(document: &Document, part: &mut Part) {
    for (id, count) in validation::duplicate_ids(document) {
        if part.local_duplicates.contains(&id) {
            continue;
        }
        let mut files: Vec<String> = part
            .nodes
            .iter()
            .filter(|(node_id, _)| *node_id == id)
            .map(|(_, origin)| origin.file.display().to_string())
            .collect();
        files.dedup();
        part.errors.push(PlanIssue::Validation(ValidationIssue {
            severity: Severity::Error,
            rule: Rule::DuplicateId,
            file: None,
            node_id: Some(id.clone()),
            message: format!(
                "id '{}' is used by {} nodes across files ({})",
                id,
                count,
                files.join(", ")
            ),
        }));
    }
}

fn load_file<'a>(
    ctx: &'a Context<'a>,
    path: PathBuf,
    chain: Vec<PathBuf>,
    attach: Option<String>,
) -> BoxFuture<'a, FileLoad> {
    async move {
        let mut part = Part::default();
        let timeout = ctx.config.io_timeout();

        let stamp = match with_timeout(&path, timeout, ctx.store.modified(&path)).await {
            Ok(stamp) => stamp,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "could not stamp file");
                None
            }
        };
        let text = match with_timeout(&path, timeout, ctx.store.read(&path)).await {
            Ok(text) => text,
            Err(err) => {
                return FileLoad {
                    outcome: Err(Failure::Unreadable(err)),
                    part,
                };
            }
        };

        let mut document = match codec::decode_file(&path, &text) {
            Ok(document) => document,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "plan file is malformed");
                part.errors.push(PlanIssue::Parse {
                    file: path.clone(),
                    message: err.to_string(),
                });
                return FileLoad {
                    outcome: Err(Failure::Malformed),
                    part,
                };
            }
        };
        debug!(path = %path.display(), nodes = document.node_count(), "parsed plan file");
        part.files.push((path.clone(), stamp));

        let report = validation::validate_with(&document, Some(&path), &ctx.options);
        for issue in report.errors.into_iter().chain(report.warnings) {
            if issue.rule == Rule::DuplicateId
                && let Some(id) = &issue.node_id
            {
                part.local_duplicates.insert(id.clone());
            }
            part.push_issue(PlanIssue::Validation(issue));
        }

        let mut jobs = Vec::new();
        collect_imports(ctx, &document.entries, attach.as_deref(), true, &path, &chain, &mut jobs, &mut part);

        let pending = jobs
            .iter()
            .filter(|job| job.record.state == ImportState::Resolved)
            .map(|job| {
                let mut branch = chain.clone();
                branch.push(job.record.target.clone());
                load_file(ctx, job.record.target.clone(), branch, job.attach.clone())
            });
        let loads = join_all(pending).await;

        let entries = std::mem::take(&mut document.entries);
        let mut jobs = jobs.into_iter();
        let mut loads = loads.into_iter();
        let entries = splice(entries, attach.as_deref(), true, &path, &mut jobs, &mut loads, &mut part);

        FileLoad {
            outcome: Ok(entries),
            part,
        }
    }
    .boxed()
}

/// First pass: one job per directive, in document order
#[allow(clippy::too_many_arguments)]
fn collect_imports(
    ctx: &Context<'_>,
    entries: &[Entry],
    parent: Option<&str>,
    top: bool,
    file: &Path,
    chain: &[PathBuf],
    jobs: &mut Vec<ImportJob>,
    part: &mut Part,
) {
    let mut anchor: Option<&str> = None;
    for (index, entry) in entries.iter().enumerate() {
        match entry {
            Entry::Node(node) => {
                anchor = Some(node.id.as_str()).filter(|id| !id.is_empty());
                collect_imports(ctx, &node.children, Some(&node.id), false, file, chain, jobs, part);
            }
            Entry::Import(directive) => {
                // Already reported by validation; nothing to resolve or keep
                if directive.src.trim().is_empty() {
                    continue;
                }
                let target = import_target(file, &directive.src);
                let state = if chain.contains(&target) {
                    let mut cycle = chain.to_vec();
                    cycle.push(target.clone());
                    warn!(importer = %file.display(), src = %directive.src, "circular import");
                    part.warnings.push(PlanIssue::Cycle {
                        importer: file.to_path_buf(),
                        src: directive.src.clone(),
                        chain: cycle,
                    });
                    ImportState::Cyclic
                } else if chain.len() >= ctx.config.max_import_depth {
                    part.errors.push(PlanIssue::Resolution {
                        importer: file.to_path_buf(),
                        src: directive.src.clone(),
                        target: target.clone(),
                        reason: format!(
                            "import depth exceeds the limit of {}",
                            ctx.config.max_import_depth
                        ),
                    });
                    ImportState::TooDeep
                } else {
                    ImportState::Resolved
                };
                jobs.push(ImportJob {
                    attach: parent.map(str::to_string),
                    record: ImportRecord {
                        importer: file.to_path_buf(),
                        parent: if top { None } else { parent.map(str::to_string) },
                        anchor: anchor.map(str::to_string),
                        index,
                        src: directive.src.clone(),
                        target,
                        state,
                    },
                });
            }
        }
    }
}

/// Second pass: replace each directive by its resolved entries
#[allow(clippy::too_many_arguments)]
fn splice(
    entries: Vec<Entry>,
    parent: Option<&str>,
    top: bool,
    file: &Path,
    jobs: &mut std::vec::IntoIter<ImportJob>,
    loads: &mut std::vec::IntoIter<FileLoad>,
    part: &mut Part,
) -> Vec<Entry> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            Entry::Node(mut node) => {
                part.nodes.push((
                    node.id.clone(),
                    NodeOrigin {
                        file: file.to_path_buf(),
                        parent: parent.map(str::to_string),
                        boundary: top,
                    },
                ));
                let children = std::mem::take(&mut node.children);
                let id = node.id.clone();
                node.children = splice(children, Some(&id), false, file, jobs, loads, part);
                out.push(Entry::Node(node));
            }
            Entry::Import(directive) => {
                if directive.src.trim().is_empty() {
                    continue;
                }
                let Some(mut job) = jobs.next() else { continue };
                if job.record.state == ImportState::Resolved
                    && let Some(load) = loads.next()
                {
                    part.absorb(load.part);
                    match load.outcome {
                        Ok(resolved) => out.extend(resolved),
                        Err(Failure::Malformed) => job.record.state = ImportState::Malformed,
                        Err(Failure::Unreadable(err)) => {
                            warn!(
                                importer = %file.display(),
                                src = %job.record.src,
                                error = %err,
                                "import could not be resolved"
                            );
                            job.record.state = ImportState::Missing;
                            part.errors.push(PlanIssue::Resolution {
                                importer: file.to_path_buf(),
                                src: job.record.src.clone(),
                                target: job.record.target.clone(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
                part.imports.push(job.record);
            }
        }
    }
    out
}
