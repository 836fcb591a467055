//! The job reconciliation table.
//!
//! Holds three pieces of state:
//!
//! - `active`: job records keyed by id, in the order they were added.
//! - `samples`: the most recent [`ProgressSample`] per id. A sample may
//!   exist without a job (an orphan) when progress for an id arrives
//!   before, or without, the submission response.
//! - `history`: dismissed jobs, newest first, capped.
//!
//! An id appears at most once across `active` and `history` combined.

use std::collections::VecDeque;

use indexmap::IndexMap;
use serde_json::Value;

use mediadeck_core::job::clamp_progress;
use mediadeck_core::{Job, JobId, JobStatus};
use mediadeck_events::{MetadataFrame, ProgressFrame, StreamMessage};

use crate::sample::{JobView, ProgressSample};

/// Maximum number of dismissed jobs kept in history.
pub const DEFAULT_HISTORY_CAP: usize = 50;

/// What [`JobStore::apply_progress`] did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The job record and its sample were overwritten.
    Updated,
    /// No job record exists; the update was kept as an orphaned sample.
    Orphaned,
    /// The job was already dismissed to history; the update was dropped.
    Dismissed,
    /// The update would have moved the job out of a terminal state (or
    /// back to pending) and was dropped.
    Rejected {
        current: JobStatus,
        attempted: JobStatus,
    },
}

/// Authoritative in-memory table of known jobs.
#[derive(Debug)]
pub struct JobStore {
    active: IndexMap<JobId, Job>,
    samples: IndexMap<JobId, ProgressSample>,
    history: VecDeque<Job>,
    history_cap: usize,
    is_processing: bool,
    last_metadata: Option<Value>,
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_history_cap(DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_cap(history_cap: usize) -> Self {
        Self {
            active: IndexMap::new(),
            samples: IndexMap::new(),
            history: VecDeque::with_capacity(history_cap),
            history_cap,
            is_processing: false,
            last_metadata: None,
        }
    }

    // ---- mutations ----

    /// Insert or overwrite the job under its id.
    ///
    /// A same-id entry in history is dropped. If an orphaned sample for
    /// this id is already waiting (progress raced ahead of the submission
    /// response), the job adopts its status and progress. When the job
    /// replaces an existing record, the record passed in is the newer
    /// state and the old sample is discarded.
    pub fn add_active_job(&mut self, mut job: Job) {
        self.history.retain(|old| old.id != job.id);

        let replaces_record = self.active.contains_key(&job.id);
        let adopt = !replaces_record
            && self
                .samples
                .get(&job.id)
                .is_some_and(|sample| job.status.can_transition_to(sample.status));

        if adopt {
            if let Some(sample) = self.samples.get(&job.id) {
                overwrite_from_sample(&mut job, sample);
            }
        } else {
            self.samples.shift_remove(&job.id);
        }

        tracing::debug!(job_id = %job.id, status = %job.status, "Job added to active set");
        self.active.insert(job.id.clone(), job);
        self.recompute_processing();
    }

    /// Apply a progress report as a full snapshot of the job's state.
    ///
    /// Reports for a job already dismissed to history are dropped.
    pub fn apply_progress(&mut self, sample: ProgressSample) -> ApplyOutcome {
        if !self.active.contains_key(&sample.job_id)
            && self.history.iter().any(|job| job.id == sample.job_id)
        {
            tracing::debug!(job_id = %sample.job_id, "Ignoring progress for dismissed job");
            return ApplyOutcome::Dismissed;
        }

        let current = match self.active.get(&sample.job_id) {
            Some(job) => Some(job.status),
            None => self.samples.get(&sample.job_id).map(|s| s.status),
        };
        if let Some(current) = current {
            if !current.can_transition_to(sample.status) {
                tracing::debug!(
                    job_id = %sample.job_id,
                    %current,
                    attempted = %sample.status,
                    "Ignoring progress that would leave a settled state",
                );
                return ApplyOutcome::Rejected {
                    current,
                    attempted: sample.status,
                };
            }
        }

        let outcome = match self.active.get_mut(&sample.job_id) {
            Some(job) => {
                overwrite_from_sample(job, &sample);
                if job.status == JobStatus::Failed {
                    tracing::info!(
                        job_id = %job.id,
                        error = job.error.as_deref().unwrap_or("unknown error"),
                        "Job failed",
                    );
                }
                ApplyOutcome::Updated
            }
            None => {
                tracing::debug!(job_id = %sample.job_id, "Progress for unknown job kept as orphan");
                ApplyOutcome::Orphaned
            }
        };

        self.samples.insert(sample.job_id.clone(), sample);
        outcome
    }

    /// Apply a download job-stream frame.
    pub fn apply_download_progress(&mut self, frame: &ProgressFrame) -> ApplyOutcome {
        self.apply_progress(ProgressSample::from(frame))
    }

    /// Remember the latest metadata document.
    pub fn record_metadata(&mut self, frame: &MetadataFrame) {
        self.last_metadata = Some(frame.metadata.clone());
    }

    /// Route any classified stream message to the matching mutation.
    ///
    /// Returns `None` for metadata frames, which carry no job state.
    pub fn apply_message(&mut self, message: &StreamMessage) -> Option<ApplyOutcome> {
        match message {
            StreamMessage::Metadata(frame) => {
                self.record_metadata(frame);
                None
            }
            StreamMessage::Progress(frame) => Some(self.apply_download_progress(frame)),
            StreamMessage::ToolsProgress(frame) => {
                Some(self.apply_progress(ProgressSample::from(frame.clone())))
            }
        }
    }

    /// Dismiss a job: move it to the head of history and forget its
    /// sample. Also clears an orphaned sample with this id.
    pub fn remove_active_job(&mut self, id: &str) -> Option<Job> {
        self.samples.shift_remove(id);
        let removed = self.active.shift_remove(id);

        if let Some(job) = &removed {
            self.history.retain(|old| old.id != job.id);
            self.history.push_front(job.clone());
            self.history.truncate(self.history_cap);
            tracing::debug!(job_id = %id, status = %job.status, "Job moved to history");
        }

        self.recompute_processing();
        removed
    }

    /// Re-seed active jobs from the backend's listing after a reconnect.
    ///
    /// Listed jobs are upserted, except where the local record has
    /// already settled in a state the listing cannot move it out of.
    /// Returns the ids of unfinished local jobs the listing did not
    /// mention; they stay active, since their terminal event may simply
    /// have been missed.
    pub fn resync(&mut self, jobs: Vec<Job>) -> Vec<JobId> {
        let listed: Vec<JobId> = jobs.iter().map(|j| j.id.clone()).collect();
        for job in jobs {
            if let Some(local) = self.active.get(&job.id) {
                if !local.status.can_transition_to(job.status) {
                    tracing::debug!(
                        job_id = %job.id,
                        local = %local.status,
                        listed = %job.status,
                        "Keeping settled job over stale listing",
                    );
                    continue;
                }
            }
            self.add_active_job(job);
        }

        self.active
            .values()
            .filter(|job| !job.is_terminal() && !listed.contains(&job.id))
            .map(|job| job.id.clone())
            .collect()
    }

    /// Dismiss everything that has settled: terminal active jobs move to
    /// history, terminal orphaned samples are forgotten. Returns the
    /// dismissed ids in table order.
    pub fn dismiss_settled(&mut self) -> Vec<JobId> {
        let settled_jobs: Vec<JobId> = self
            .active
            .values()
            .filter(|job| job.is_terminal())
            .map(|job| job.id.clone())
            .collect();
        for id in &settled_jobs {
            self.remove_active_job(id);
        }

        let settled_orphans: Vec<JobId> = self
            .orphans()
            .filter(|sample| sample.status.is_terminal())
            .map(|sample| sample.job_id.clone())
            .collect();
        for id in &settled_orphans {
            self.samples.shift_remove(id);
        }

        settled_jobs.into_iter().chain(settled_orphans).collect()
    }

    fn recompute_processing(&mut self) {
        self.is_processing = !self.active.is_empty();
    }

    // ---- queries ----

    /// `true` while at least one job is active.
    pub fn is_processing(&self) -> bool {
        self.is_processing
    }

    pub fn active_job(&self, id: &str) -> Option<&Job> {
        self.active.get(id)
    }

    /// Active jobs in the order they were added.
    pub fn active_jobs(&self) -> impl Iterator<Item = &Job> {
        self.active.values()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn sample(&self, id: &str) -> Option<&ProgressSample> {
        self.samples.get(id)
    }

    /// Samples with no job record behind them.
    pub fn orphans(&self) -> impl Iterator<Item = &ProgressSample> {
        self.samples
            .values()
            .filter(|s| !self.active.contains_key(&s.job_id))
    }

    /// Dismissed jobs, newest first.
    pub fn history(&self) -> impl Iterator<Item = &Job> {
        self.history.iter()
    }

    pub fn last_metadata(&self) -> Option<&Value> {
        self.last_metadata.as_ref()
    }

    /// Rows for the UI: active jobs merged with their samples, then
    /// orphaned samples marked ephemeral.
    pub fn views(&self) -> Vec<JobView> {
        self.active
            .values()
            .map(|job| JobView::from_job(job, self.samples.get(&job.id)))
            .chain(self.orphans().map(JobView::from_orphan))
            .collect()
    }
}

/// Snapshot overwrite: status, progress and error all come from the
/// sample, whatever the job held before.
fn overwrite_from_sample(job: &mut Job, sample: &ProgressSample) {
    job.status = sample.status;
    job.progress = clamp_progress(sample.progress);
    job.error = sample.error.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn job(id: &str) -> Job {
        Job::new(id, "workflow")
    }

    #[test]
    fn add_sets_processing_flag() {
        let mut store = JobStore::new();
        assert!(!store.is_processing());
        store.add_active_job(job("a"));
        assert!(store.is_processing());
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn add_overwrites_same_id() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        store.add_active_job(Job::new("a", "trim"));
        assert_eq!(store.active_count(), 1);
        assert_eq!(store.active_job("a").unwrap().operation_type, "trim");
    }

    #[test]
    fn progress_overwrites_status_and_percentage() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));

        let outcome =
            store.apply_progress(ProgressSample::new("a", JobStatus::Processing, 40.0));

        assert_eq!(outcome, ApplyOutcome::Updated);
        let a = store.active_job("a").unwrap();
        assert_eq!(a.status, JobStatus::Processing);
        assert_eq!(a.progress, 40.0);
    }

    #[test]
    fn failure_attaches_error() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        store.apply_progress(
            ProgressSample::new("a", JobStatus::Failed, 30.0).with_error("ffmpeg exited with 1"),
        );
        let a = store.active_job("a").unwrap();
        assert_eq!(a.status, JobStatus::Failed);
        assert_eq!(a.error.as_deref(), Some("ffmpeg exited with 1"));
    }

    #[test]
    fn terminal_state_is_not_left() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        store.apply_progress(ProgressSample::new("a", JobStatus::Complete, 100.0));

        let outcome = store.apply_progress(ProgressSample::new("a", JobStatus::Processing, 80.0));

        assert_matches!(
            outcome,
            ApplyOutcome::Rejected {
                current: JobStatus::Complete,
                attempted: JobStatus::Processing
            }
        );
        let a = store.active_job("a").unwrap();
        assert_eq!(a.status, JobStatus::Complete);
        assert_eq!(a.progress, 100.0);
        assert_eq!(store.sample("a").unwrap().status, JobStatus::Complete);
    }

    #[test]
    fn pending_may_jump_to_terminal() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        let outcome = store.apply_progress(ProgressSample::new("a", JobStatus::Complete, 100.0));
        assert_eq!(outcome, ApplyOutcome::Updated);
    }

    #[test]
    fn orphan_is_not_promoted_to_job() {
        let mut store = JobStore::new();
        let outcome = store.apply_progress(ProgressSample::new("ghost", JobStatus::Processing, 5.0));

        assert_eq!(outcome, ApplyOutcome::Orphaned);
        assert!(store.active_job("ghost").is_none());
        assert!(!store.is_processing());
        assert_eq!(store.orphans().count(), 1);
    }

    #[test]
    fn late_submission_adopts_orphan_state() {
        let mut store = JobStore::new();
        store.apply_progress(ProgressSample::new("a", JobStatus::Processing, 25.0));

        store.add_active_job(job("a"));

        let a = store.active_job("a").unwrap();
        assert_eq!(a.status, JobStatus::Processing);
        assert_eq!(a.progress, 25.0);
        assert_eq!(store.orphans().count(), 0);
    }

    #[test]
    fn remove_moves_to_history_head() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        store.add_active_job(job("b"));
        store.apply_progress(ProgressSample::new("a", JobStatus::Processing, 10.0));

        store.remove_active_job("a");
        store.remove_active_job("b");

        assert!(!store.is_processing());
        assert!(store.sample("a").is_none());
        let ids: Vec<_> = store.history().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn remove_unknown_id_clears_orphan() {
        let mut store = JobStore::new();
        store.apply_progress(ProgressSample::new("ghost", JobStatus::Processing, 5.0));

        assert!(store.remove_active_job("ghost").is_none());
        assert_eq!(store.orphans().count(), 0);
        assert_eq!(store.history().count(), 0);
    }

    #[test]
    fn history_is_capped_oldest_evicted() {
        let mut store = JobStore::with_history_cap(3);
        for i in 0..5 {
            let id = format!("j{i}");
            store.add_active_job(job(&id));
            store.remove_active_job(&id);
        }
        let ids: Vec<_> = store.history().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["j4", "j3", "j2"]);
    }

    #[test]
    fn readding_dismissed_job_removes_history_copy() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        store.remove_active_job("a");
        store.add_active_job(job("a"));

        assert_eq!(store.history().count(), 0);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn views_list_jobs_then_orphans() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        store.apply_progress(
            ProgressSample::new("a", JobStatus::Processing, 50.0).with_step("convert"),
        );
        store.apply_progress(ProgressSample::new("ghost", JobStatus::Processing, 5.0));

        let views = store.views();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].id, "a");
        assert_eq!(views[0].current_step.as_deref(), Some("convert"));
        assert!(!views[0].ephemeral);
        assert_eq!(views[1].id, "ghost");
        assert!(views[1].ephemeral);
        assert!(views[1].operation_type.is_none());
    }

    #[test]
    fn resync_reports_unlisted_unfinished_jobs() {
        let mut store = JobStore::new();
        store.add_active_job(job("kept"));
        store.add_active_job(job("missing"));
        store.add_active_job(job("done"));
        store.apply_progress(ProgressSample::new("done", JobStatus::Complete, 100.0));

        let mut listed = job("kept");
        listed.status = JobStatus::Processing;
        listed.progress = 70.0;
        let stale = store.resync(vec![listed, job("new")]);

        assert_eq!(stale, vec!["missing".to_string()]);
        assert_eq!(store.active_job("kept").unwrap().progress, 70.0);
        assert!(store.active_job("new").is_some());
        assert!(store.active_job("missing").is_some());
    }

    #[test]
    fn resync_does_not_reopen_settled_jobs() {
        let mut store = JobStore::new();
        store.add_active_job(job("j1"));
        store.apply_progress(ProgressSample::new("j1", JobStatus::Complete, 100.0));

        let mut lagging = job("j1");
        lagging.status = JobStatus::Processing;
        lagging.progress = 80.0;
        let stale = store.resync(vec![lagging]);

        assert!(stale.is_empty());
        let j1 = store.active_job("j1").unwrap();
        assert_eq!(j1.status, JobStatus::Complete);
        assert_eq!(j1.progress, 100.0);
    }

    #[test]
    fn resync_listing_wins_over_pre_disconnect_sample() {
        let mut store = JobStore::new();
        store.add_active_job(job("j1"));
        store.apply_progress(
            ProgressSample::new("j1", JobStatus::Processing, 40.0).with_step("encode"),
        );

        let mut fresh = job("j1");
        fresh.status = JobStatus::Processing;
        fresh.progress = 90.0;
        store.resync(vec![fresh]);

        let j1 = store.active_job("j1").unwrap();
        assert_eq!(j1.status, JobStatus::Processing);
        assert_eq!(j1.progress, 90.0);
        assert!(store.sample("j1").is_none());
        assert_eq!(store.views()[0].progress, 90.0);
    }

    #[test]
    fn progress_after_dismissal_creates_no_orphan() {
        let mut store = JobStore::new();
        store.add_active_job(job("a"));
        store.remove_active_job("a");

        let outcome = store.apply_progress(ProgressSample::new("a", JobStatus::Complete, 100.0));

        assert_eq!(outcome, ApplyOutcome::Dismissed);
        assert_eq!(store.orphans().count(), 0);
        assert!(store.sample("a").is_none());
    }

    #[test]
    fn dismiss_settled_clears_terminal_jobs_and_orphans() {
        let mut store = JobStore::new();
        store.add_active_job(job("running"));
        store.add_active_job(job("done"));
        store.apply_progress(ProgressSample::new("running", JobStatus::Processing, 30.0));
        store.apply_progress(ProgressSample::new("done", JobStatus::Complete, 100.0));
        store.apply_progress(ProgressSample::new("dl-live", JobStatus::Processing, 10.0));
        store.apply_progress(ProgressSample::new("dl-done", JobStatus::Complete, 100.0));

        let dismissed = store.dismiss_settled();

        assert_eq!(dismissed, vec!["done".to_string(), "dl-done".to_string()]);
        assert_eq!(store.active_count(), 1);
        assert!(store.is_processing());
        assert_eq!(store.history().next().unwrap().id, "done");
        let orphans: Vec<_> = store.orphans().map(|s| s.job_id.as_str()).collect();
        assert_eq!(orphans, vec!["dl-live"]);
        assert!(store.dismiss_settled().is_empty());
    }

    #[test]
    fn metadata_is_retained() {
        let mut store = JobStore::new();
        let message = StreamMessage::Metadata(MetadataFrame {
            metadata: serde_json::json!({"title": "clip"}),
            job_id: None,
        });
        assert!(store.apply_message(&message).is_none());
        assert_eq!(store.last_metadata().unwrap()["title"], "clip");
    }
}
