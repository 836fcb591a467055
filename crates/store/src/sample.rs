//! Progress samples and the derived rows the UI renders.

use serde::Serialize;

use mediadeck_core::job::clamp_progress;
use mediadeck_core::{Job, JobId, JobStatus};
use mediadeck_events::{ProgressFrame, ToolsProgressFrame};

/// Latest progress report for one job id.
///
/// Replaced wholesale by every newer report; fields are never merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Completion percentage, clamped to 0-100.
    pub progress: f64,
    pub current_step: Option<String>,
    /// Seconds.
    pub time_elapsed: Option<f64>,
    /// Seconds.
    pub time_remaining: Option<f64>,
    pub error: Option<String>,
}

impl ProgressSample {
    pub fn new(job_id: impl Into<JobId>, status: JobStatus, progress: f64) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            progress: clamp_progress(progress),
            current_step: None,
            time_elapsed: None,
            time_remaining: None,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }
}

impl From<ToolsProgressFrame> for ProgressSample {
    fn from(frame: ToolsProgressFrame) -> Self {
        Self {
            job_id: frame.job_id,
            status: frame.status,
            progress: clamp_progress(frame.progress),
            current_step: frame.current_step,
            time_elapsed: frame.time_elapsed,
            time_remaining: frame.time_remaining,
            error: frame.error,
        }
    }
}

/// Download job-stream frames carry no status; the job is processing
/// until the overall percentage reaches 100.
impl From<&ProgressFrame> for ProgressSample {
    fn from(frame: &ProgressFrame) -> Self {
        let progress = clamp_progress(frame.progress);
        let status = if progress >= 100.0 {
            JobStatus::Complete
        } else {
            JobStatus::Processing
        };
        let mut sample = Self::new(frame.job_id.clone(), status, progress);
        if frame.total_items > 0 {
            sample.current_step = Some(format!("item {}/{}", frame.current_item, frame.total_items));
        }
        sample
    }
}

/// One UI row: a job merged with its latest sample, or an orphaned
/// sample with no job record behind it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: JobId,
    /// `None` for orphaned samples, whose operation is unknown.
    pub operation_type: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub current_step: Option<String>,
    pub time_remaining: Option<f64>,
    pub error: Option<String>,
    /// `true` when no job record exists for this id.
    pub ephemeral: bool,
}

impl JobView {
    pub(crate) fn from_job(job: &Job, sample: Option<&ProgressSample>) -> Self {
        Self {
            id: job.id.clone(),
            operation_type: Some(job.operation_type.clone()),
            status: job.status,
            progress: job.progress,
            current_step: sample.and_then(|s| s.current_step.clone()),
            time_remaining: sample.and_then(|s| s.time_remaining),
            error: job.error.clone(),
            ephemeral: false,
        }
    }

    pub(crate) fn from_orphan(sample: &ProgressSample) -> Self {
        Self {
            id: sample.job_id.clone(),
            operation_type: None,
            status: sample.status,
            progress: sample.progress,
            current_step: sample.current_step.clone(),
            time_remaining: sample.time_remaining,
            error: sample.error.clone(),
            ephemeral: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download_frame(progress: f64, current: u32, total: u32) -> ProgressFrame {
        ProgressFrame {
            job_id: "d1".into(),
            job_type: "playlist".into(),
            current_item: current,
            total_items: total,
            progress,
            current_video_progress: 0.0,
        }
    }

    #[test]
    fn download_frame_in_flight_is_processing() {
        let sample = ProgressSample::from(&download_frame(40.0, 2, 5));
        assert_eq!(sample.status, JobStatus::Processing);
        assert_eq!(sample.current_step.as_deref(), Some("item 2/5"));
    }

    #[test]
    fn download_frame_at_hundred_is_complete() {
        let sample = ProgressSample::from(&download_frame(100.0, 5, 5));
        assert_eq!(sample.status, JobStatus::Complete);
    }

    #[test]
    fn single_item_download_has_no_step_when_total_unknown() {
        let sample = ProgressSample::from(&download_frame(12.0, 0, 0));
        assert!(sample.current_step.is_none());
    }

    #[test]
    fn tools_frame_progress_is_clamped() {
        let frame = ToolsProgressFrame {
            job_id: "t1".into(),
            operation_type: None,
            status: JobStatus::Processing,
            progress: 140.0,
            current_step: None,
            time_elapsed: None,
            time_remaining: None,
            error: None,
        };
        assert_eq!(ProgressSample::from(frame).progress, 100.0);
    }
}
