//! A [`JobStore`] shared between the stream dispatcher and the UI layer.
//!
//! Mutations run under a short-lived lock that is never held across an
//! `.await`. After each mutation the revision counter on a
//! [`tokio::sync::watch`] channel is bumped so renderers know to re-read.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use mediadeck_core::{Job, JobId};
use mediadeck_events::{Category, Dispatcher, StreamMessage, Subscription};

use crate::store::{ApplyOutcome, JobStore};

/// Cloneable handle to one shared [`JobStore`].
#[derive(Clone)]
pub struct SharedJobStore {
    inner: Arc<Mutex<JobStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl SharedJobStore {
    pub fn new(store: JobStore) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(store)),
            revision: Arc::new(revision),
        }
    }

    /// Register this store as a permanent subscriber for every category
    /// that carries job state.
    ///
    /// The returned handles may be dropped; the subscriptions stay
    /// registered until explicitly removed.
    pub fn attach(&self, dispatcher: &Dispatcher) -> Vec<Subscription> {
        [Category::Metadata, Category::Progress, Category::ToolsProgress]
            .into_iter()
            .map(|category| {
                let store = self.clone();
                dispatcher.subscribe(category, move |message: &StreamMessage| {
                    store.apply_message(message);
                })
            })
            .collect()
    }

    /// Receiver that observes a new revision after every mutation.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Current revision number.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Run `f` against a read-only view of the store.
    pub fn read<R>(&self, f: impl FnOnce(&JobStore) -> R) -> R {
        f(&self.lock())
    }

    /// Run `f` against the store and publish a new revision.
    pub fn update<R>(&self, f: impl FnOnce(&mut JobStore) -> R) -> R {
        let result = f(&mut self.lock());
        self.revision.send_modify(|rev| *rev += 1);
        result
    }

    pub fn add_active_job(&self, job: Job) {
        self.update(|store| store.add_active_job(job));
    }

    pub fn remove_active_job(&self, id: &str) -> Option<Job> {
        self.update(|store| store.remove_active_job(id))
    }

    pub fn apply_message(&self, message: &StreamMessage) -> Option<ApplyOutcome> {
        self.update(|store| store.apply_message(message))
    }

    pub fn resync(&self, jobs: Vec<Job>) -> Vec<JobId> {
        self.update(|store| store.resync(jobs))
    }

    /// Dismiss settled jobs and orphans. Publishes a new revision only
    /// when something was dismissed, so a watcher that calls this after
    /// every revision does not wake itself forever.
    pub fn dismiss_settled(&self) -> Vec<JobId> {
        let dismissed = self.lock().dismiss_settled();
        if !dismissed.is_empty() {
            self.revision.send_modify(|rev| *rev += 1);
        }
        dismissed
    }

    pub fn is_processing(&self) -> bool {
        self.read(JobStore::is_processing)
    }

    fn lock(&self) -> MutexGuard<'_, JobStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SharedJobStore {
    fn default() -> Self {
        Self::new(JobStore::new())
    }
}

impl std::fmt::Debug for SharedJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedJobStore")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}
