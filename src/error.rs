//! Error and issue types
//!
//! Loading is best-effort and saving is all-or-nothing, so most problems are
//! collected as [`PlanIssue`] values instead of being returned as `Err`.

use std::path::PathBuf;
use thiserror::Error;

/// How serious an issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Blocks saving of the affected document
    Error,
    /// Reported to the user, never blocking
    Warning,
}

/// Validation rule that produced an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    MissingId,
    MissingTitle,
    DuplicateId,
    MissingImportSrc,
    UnknownPriority,
    UnknownStatus,
    ImportPath,
    CodeLanguage,
    PromptTooLong,
    SensitiveData,
    DestructiveCommand,
    InvalidDate,
    DateOrder,
}

/// A single validator finding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub rule: Rule,
    /// File the finding belongs to, when known
    pub file: Option<PathBuf>,
    /// Node the finding belongs to, when it concerns a node
    pub node_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}: ", file.display())?;
        }
        if let Some(id) = &self.node_id {
            write!(f, "node '{}': ", id)?;
        }
        f.write_str(&self.message)
    }
}

/// Problems found while loading or saving a plan
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanIssue {
    /// Malformed file; only that file's subtree is lost
    #[error("{}: parse error: {message}", .file.display())]
    Parse { file: PathBuf, message: String },

    /// Import target missing or unreadable; the subtree is skipped
    #[error("{}: import '{src}' could not be resolved: {reason}", .importer.display())]
    Resolution {
        importer: PathBuf,
        src: String,
        target: PathBuf,
        reason: String,
    },

    /// Circular import; recursion stopped at the repeated file
    #[error("{}: circular import of '{src}' (chain: {})", .importer.display(), display_chain(.chain))]
    Cycle {
        importer: PathBuf,
        src: String,
        chain: Vec<PathBuf>,
    },

    #[error("{0}")]
    Validation(ValidationIssue),

    /// Serialized output did not re-parse; the original file is kept
    #[error("{}: sanitized output failed verification: {message}", .file.display())]
    Sanitization { file: PathBuf, message: String },

    /// File changed on disk since it was loaded
    #[error("{}: file was modified on disk since it was loaded", .file.display())]
    Conflict { file: PathBuf },

    /// Reconstructed files would import each other in a loop
    #[error("saving would create a circular import: {}", display_chain(.chain))]
    ImportLoop { chain: Vec<PathBuf> },

    /// File could not be loaded, so saving would replace content nobody has seen
    #[error("{}: file was not loaded cleanly and will not be overwritten", .file.display())]
    NotLoaded { file: PathBuf },

    /// Storage layer failure
    #[error("{}: {message}", .file.display())]
    Store { file: PathBuf, message: String },

    /// Save succeeded but the layout of a file changed
    #[error("{}: {message}", .file.display())]
    Notice { file: PathBuf, message: String },
}

impl PlanIssue {
    pub fn severity(&self) -> Severity {
        match self {
            PlanIssue::Cycle { .. } | PlanIssue::Notice { .. } => Severity::Warning,
            PlanIssue::Validation(issue) => issue.severity,
            _ => Severity::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity() == Severity::Error
    }

    pub(crate) fn store(file: impl Into<PathBuf>, err: &StoreError) -> Self {
        PlanIssue::Store {
            file: file.into(),
            message: err.to_string(),
        }
    }
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised by a [`FileStore`](crate::storage::FileStore)
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{}: operation timed out after {timeout_ms}ms", .path.display())]
    TimedOut { path: PathBuf, timeout_ms: u64 },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound(path.into())
        } else {
            StoreError::Io {
                path: path.into(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_is_warning() {
        let issue = PlanIssue::Cycle {
            importer: PathBuf::from("/p/b.xml"),
            src: "a.xml".to_string(),
            chain: vec![PathBuf::from("/p/a.xml"), PathBuf::from("/p/b.xml")],
        };
        assert_eq!(issue.severity(), Severity::Warning);
        assert_eq!(
            issue.to_string(),
            "/p/b.xml: circular import of 'a.xml' (chain: /p/a.xml -> /p/b.xml)"
        );
    }

    #[test]
    fn test_not_found_io_error_maps_to_not_found() {
        let err = StoreError::io(
            "/p/x.xml",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
