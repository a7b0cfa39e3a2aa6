//! File access consumed by the resolver and the partitioner
//!
//! The engine never touches the filesystem directly; it goes through a
//! [`FileStore`], and every call it makes is bounded by a timeout.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, UNIX_EPOCH};
use tracing::debug;

/// Snapshot of a file's change marker, taken at load and compared at save
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileStamp {
    /// Modification time in nanoseconds, or a store generation
    pub modified: u128,
    pub len: u64,
}

/// Asynchronous text file access
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a whole file; a missing file is `StoreError::NotFound`
    async fn read(&self, path: &Path) -> Result<String, StoreError>;

    /// Replace a file's content, creating it when absent
    async fn write(&self, path: &Path, contents: &str) -> Result<(), StoreError>;

    /// Current stamp of a file, `None` when it does not exist
    async fn modified(&self, path: &Path) -> Result<Option<FileStamp>, StoreError>;
}

/// Run a store call under `timeout`
pub(crate) async fn with_timeout<T, F>(path: &Path, timeout: Duration, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::TimedOut {
            path: path.to_path_buf(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// Filesystem-backed store using tokio's fs
#[derive(Debug, Clone, Default)]
pub struct FsStore;

impl FsStore {
    pub fn new() -> Self {
        Self
    }

    fn temp_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plan".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        path.with_file_name(format!(".{}.{}.tmp", name, &suffix[..8]))
    }
}

#[async_trait]
impl FileStore for FsStore {
    async fn read(&self, path: &Path) -> Result<String, StoreError> {
        debug!(path = %path.display(), "reading file");
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        debug!(path = %path.display(), bytes = contents.len(), "writing file");
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        // Write a sibling temp file, then rename over the target
        let temp = Self::temp_path(path);
        if let Err(e) = tokio::fs::write(&temp, contents).await {
            return Err(StoreError::io(&temp, e));
        }
        if let Err(e) = tokio::fs::rename(&temp, path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::io(path, e));
        }
        Ok(())
    }

    async fn modified(&self, path: &Path) -> Result<Option<FileStamp>, StoreError> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(Some(FileStamp {
            modified,
            len: metadata.len(),
        }))
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    files: HashMap<PathBuf, (String, u128)>,
    generation: u128,
    failing_writes: HashSet<PathBuf>,
    stalled: HashSet<PathBuf>,
    write_log: Vec<PathBuf>,
}

/// In-process store keyed by path
///
/// Every write bumps a generation counter that serves as the file stamp.
/// Writes can be made to fail and reads to hang, per path.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryStore::insert`]
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.insert(path, contents);
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a file in place without recording it as a write
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        let mut state = self.state();
        state.generation += 1;
        let generation = state.generation;
        state
            .files
            .insert(path.into(), (contents.into(), generation));
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<String> {
        self.state()
            .files
            .get(path.as_ref())
            .map(|(contents, _)| contents.clone())
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.state().files.contains_key(path.as_ref())
    }

    /// All stored paths, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.state().files.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Paths passed to `write`, in call order
    pub fn write_log(&self) -> Vec<PathBuf> {
        self.state().write_log.clone()
    }

    /// Make every later write to `path` fail
    pub fn fail_writes_to(&self, path: impl Into<PathBuf>) {
        self.state().failing_writes.insert(path.into());
    }

    /// Make every later read of `path` hang forever
    pub fn stall(&self, path: impl Into<PathBuf>) {
        self.state().stalled.insert(path.into());
    }
}

#[async_trait]
impl FileStore for MemoryStore {
    async fn read(&self, path: &Path) -> Result<String, StoreError> {
        let result = {
            let state = self.state();
            if state.stalled.contains(path) {
                None
            } else {
                Some(
                    state
                        .files
                        .get(path)
                        .map(|(contents, _)| contents.clone())
                        .ok_or_else(|| StoreError::NotFound(path.to_path_buf())),
                )
            }
        };
        match result {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn write(&self, path: &Path, contents: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        state.write_log.push(path.to_path_buf());
        if state.failing_writes.contains(path) {
            return Err(StoreError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "write refused"),
            ));
        }
        state.generation += 1;
        let generation = state.generation;
        state
            .files
            .insert(path.to_path_buf(), (contents.to_string(), generation));
        Ok(())
    }

    async fn modified(&self, path: &Path) -> Result<Option<FileStamp>, StoreError> {
        Ok(self
            .state()
            .files
            .get(path)
            .map(|(contents, generation)| FileStamp {
                modified: *generation,
                len: contents.len() as u64,
            }))
    }
}
