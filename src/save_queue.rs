//! Coalescing save requests
//!
//! Edits arrive in bursts; each burst should cost one split-save. `submit`
//! replaces the pending snapshot, and whoever flushes next saves only the
//! newest one.
//!
//! After each successful save the plan is re-resolved. A later snapshot whose
//! provenance no longer matches the files on disk is saved against that fresh
//! provenance instead, so consecutive saves do not conflict with each other.

use crate::config::PlanConfig;
use crate::plan::Document;
use crate::provenance::ProvenanceMap;
use crate::resolver::{Resolution, resolve};
use crate::split_save::{SaveReport, provenance_is_current, split_save};
use crate::storage::FileStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct QueueState {
    pending: Option<(Document, ProvenanceMap)>,
    /// Generation of the newest submitted snapshot
    submitted: u64,
    /// Generation of the newest snapshot whose save finished
    saved: u64,
    saves: u64,
    last_report: Option<SaveReport>,
    /// The plan as re-resolved after the last successful save
    refreshed: Option<Resolution>,
    closed: bool,
}

pub struct SaveQueue {
    store: Arc<dyn FileStore>,
    config: PlanConfig,
    state: Mutex<QueueState>,
    requested: Notify,
    finished: Notify,
    /// Held while a save runs so flushes never overlap
    running: tokio::sync::Mutex<()>,
}

impl SaveQueue {
    pub fn new(store: Arc<dyn FileStore>, config: PlanConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(QueueState::default()),
            requested: Notify::new(),
            finished: Notify::new(),
            running: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a snapshot, replacing any snapshot not yet saved
    ///
    /// # Returns
    /// The generation of this snapshot, for [`SaveQueue::wait_for`]
    pub fn submit(&self, document: Document, provenance: ProvenanceMap) -> u64 {
        let generation = {
            let mut state = self.state();
            if state.pending.is_some() {
                debug!(generation = state.submitted, "coalescing pending save");
            }
            state.submitted += 1;
            state.pending = Some((document, provenance));
            state.submitted
        };
        self.requested.notify_one();
        generation
    }

    /// Save the newest pending snapshot, if any
    pub async fn flush(&self) -> Option<SaveReport> {
        let _running = self.running.lock().await;
        let (generation, document, provenance) = {
            let mut state = self.state();
            let (document, provenance) = state.pending.take()?;
            (state.submitted, document, provenance)
        };

        let provenance = self.rebase(provenance).await;
        let report = split_save(self.store.as_ref(), &document, &provenance, &self.config).await;
        let refreshed = if report.is_success() {
            Some(resolve(self.store.as_ref(), provenance.root(), &self.config).await)
        } else {
            None
        };
        {
            let mut state = self.state();
            state.saved = state.saved.max(generation);
            state.saves += 1;
            state.last_report = Some(report.clone());
            if refreshed.is_some() {
                state.refreshed = refreshed;
            }
        }
        self.finished.notify_waiters();
        Some(report)
    }

    /// Swap a stale provenance for the one captured after the last save
    async fn rebase(&self, provenance: ProvenanceMap) -> ProvenanceMap {
        let timeout = self.config.io_timeout();
        if provenance_is_current(self.store.as_ref(), &provenance, timeout).await {
            return provenance;
        }
        let Some(refreshed) = self.refreshed() else {
            return provenance;
        };
        if refreshed.provenance.root() == provenance.root()
            && provenance_is_current(self.store.as_ref(), &refreshed.provenance, timeout).await
        {
            debug!(root = %provenance.root().display(), "saving against provenance from the previous save");
            return refreshed.provenance;
        }
        provenance
    }

    /// The plan as re-resolved after the last successful save
    pub fn refreshed(&self) -> Option<Resolution> {
        self.state().refreshed.clone()
    }

    /// Wait until the snapshot of `generation` (or a newer one) was saved
    pub async fn wait_for(&self, generation: u64) {
        loop {
            let finished = self.finished.notified();
            {
                let state = self.state();
                if state.saved >= generation || state.closed {
                    return;
                }
            }
            finished.await;
        }
    }

    pub fn pending(&self) -> bool {
        self.state().pending.is_some()
    }

    /// Number of split-saves run so far
    pub fn saves(&self) -> u64 {
        self.state().saves
    }

    pub fn last_report(&self) -> Option<SaveReport> {
        self.state().last_report.clone()
    }

    /// Save whatever is pending, then stop the worker
    pub async fn close(&self) {
        self.flush().await;
        self.state().closed = true;
        self.requested.notify_one();
        self.finished.notify_waiters();
    }

    /// Run a background worker that flushes after every burst of submits
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                queue.requested.notified().await;
                if queue.state().closed {
                    break;
                }
                queue.flush().await;
            }
        })
    }
}
