//! Turns successive store snapshots into per-job change events, so the
//! daemon logs what moved instead of the whole table on every frame.
//! Settled rows are dismissed once logged, which keeps the store bounded.

use std::collections::HashMap;

use mediadeck_core::JobId;
use mediadeck_store::{JobView, SharedJobStore};

/// Progress deltas smaller than this (in percent) are not reported
/// unless the status changed too.
const PROGRESS_STEP: f64 = 5.0;

#[derive(Debug, Clone, PartialEq)]
pub enum ViewChange {
    Appeared(JobView),
    Updated(JobView),
    Gone(JobId),
}

#[derive(Debug, Default)]
pub struct ViewTracker {
    last: HashMap<JobId, JobView>,
}

impl ViewTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `views` with the previous snapshot and remember them.
    ///
    /// Changes come out in `views` order, followed by removals.
    pub fn observe(&mut self, views: Vec<JobView>) -> Vec<ViewChange> {
        let mut changes = Vec::new();
        let mut next = HashMap::with_capacity(views.len());

        for view in views {
            match self.last.remove(&view.id) {
                None => changes.push(ViewChange::Appeared(view.clone())),
                Some(previous) if is_significant(&previous, &view) => {
                    changes.push(ViewChange::Updated(view.clone()));
                }
                // Keep the last reported state so small steps accumulate.
                Some(previous) => {
                    next.insert(previous.id.clone(), previous);
                    continue;
                }
            }
            next.insert(view.id.clone(), view);
        }

        let mut gone: Vec<JobId> = self.last.drain().map(|(id, _)| id).collect();
        gone.sort();
        changes.extend(gone.into_iter().map(ViewChange::Gone));

        self.last = next;
        changes
    }
}

/// Log job changes every time the store publishes a new revision, then
/// dismiss whatever has settled. Returns when the store is dropped.
pub async fn follow(store: SharedJobStore) {
    let mut changes = store.changes();
    let mut tracker = ViewTracker::new();

    loop {
        for change in tracker.observe(store.read(|s| s.views())) {
            log_change(&change);
        }
        store.dismiss_settled();
        if changes.changed().await.is_err() {
            return;
        }
    }
}

fn log_change(change: &ViewChange) {
    match change {
        ViewChange::Appeared(view) => {
            tracing::info!(
                job_id = %view.id,
                operation = view.operation_type.as_deref().unwrap_or("?"),
                status = %view.status,
                ephemeral = view.ephemeral,
                "Job appeared",
            );
        }
        ViewChange::Updated(view) => log_update(view),
        ViewChange::Gone(id) => tracing::info!(job_id = %id, "Job dismissed"),
    }
}

fn log_update(view: &JobView) {
    match &view.error {
        Some(error) => tracing::warn!(
            job_id = %view.id,
            status = %view.status,
            progress = view.progress,
            error = %error,
            "Job reported an error",
        ),
        None => tracing::info!(
            job_id = %view.id,
            status = %view.status,
            progress = view.progress,
            step = view.current_step.as_deref().unwrap_or(""),
            eta_secs = view.time_remaining.unwrap_or_default(),
            "Job progress",
        ),
    }
}

fn is_significant(previous: &JobView, current: &JobView) -> bool {
    previous.status != current.status
        || previous.error != current.error
        || previous.current_step != current.current_step
        || previous.ephemeral != current.ephemeral
        || (current.progress - previous.progress).abs() >= PROGRESS_STEP
}
