//! Workflow step model for the post-processing tool chain.
//!
//! A workflow is an ordered list of [`WorkflowStep`]s, each pairing an
//! [`Operation`] with a free-form parameter map. The backend executes the
//! whole chain as a single job. Parameter shapes are not deeply validated
//! here; the backend rejects malformed parameters at submission time.
//!
//! Editing helpers are pure: they return a new step list and never touch
//! the caller's slice, so sibling steps are never mutated.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::types::InputId;

/// Free-form parameters of a single step.
pub type ParameterMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Operation catalog
// ---------------------------------------------------------------------------

/// A chainable tool operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Trim,
    Concatenate,
    ExtractAudio,
    Convert,
    AdjustQuality,
    Rotate,
}

impl Operation {
    /// Every operation in catalog order.
    pub const ALL: [Operation; 6] = [
        Self::Trim,
        Self::Concatenate,
        Self::ExtractAudio,
        Self::Convert,
        Self::AdjustQuality,
        Self::Rotate,
    ];

    /// Wire name, also used as the single-tool endpoint segment.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trim => "trim",
            Self::Concatenate => "concatenate",
            Self::ExtractAudio => "extract_audio",
            Self::Convert => "convert",
            Self::AdjustQuality => "adjust_quality",
            Self::Rotate => "rotate",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CoreError::UnknownName {
                kind: "operation",
                name: s.to_string(),
            })
    }

    /// Default parameters shown when a step is first added.
    pub fn default_parameters(self) -> ParameterMap {
        let value = match self {
            Self::Trim => json!({ "start_time": "00:00:00", "end_time": "00:00:10" }),
            Self::Concatenate => json!({ "output_format": "mp4" }),
            Self::ExtractAudio => json!({ "format": "mp3", "bitrate": "192k" }),
            Self::Convert => json!({ "format": "mp4", "codec": "h264" }),
            Self::AdjustQuality => json!({ "resolution": "720p", "crf": 23 }),
            Self::Rotate => json!({ "angle": 90 }),
        };
        match value {
            Value::Object(map) => map,
            _ => ParameterMap::new(),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub operation: Operation,
    #[serde(default)]
    pub parameters: ParameterMap,
}

impl WorkflowStep {
    /// A step with the operation's default parameters.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            parameters: operation.default_parameters(),
        }
    }

    /// Override (or add) a single parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Presets
// ---------------------------------------------------------------------------

/// Named, fixed step sequences offered as one-click workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Re-encode to H.264 MP4 and scale down for browser playback.
    WebOptimized,
    /// Join the selected clips and keep only the audio track.
    AudioPodcast,
}

impl Preset {
    pub const ALL: [Preset; 2] = [Self::WebOptimized, Self::AudioPodcast];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebOptimized => "web_optimized",
            Self::AudioPodcast => "audio_podcast",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CoreError::UnknownName {
                kind: "preset",
                name: s.to_string(),
            })
    }

    /// The preset's steps, freshly built on every call.
    pub fn steps(self) -> Vec<WorkflowStep> {
        match self {
            Self::WebOptimized => vec![
                WorkflowStep::new(Operation::Convert),
                WorkflowStep::new(Operation::AdjustQuality)
                    .with_parameter("crf", json!(28)),
            ],
            Self::AudioPodcast => vec![
                WorkflowStep::new(Operation::Concatenate),
                WorkflowStep::new(Operation::ExtractAudio)
                    .with_parameter("bitrate", json!("128k")),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Pure step editing
// ---------------------------------------------------------------------------

/// Return `steps` with `step` appended.
pub fn append_step(steps: &[WorkflowStep], step: WorkflowStep) -> Vec<WorkflowStep> {
    let mut next = steps.to_vec();
    next.push(step);
    next
}

/// Return `steps` without the step at `index`.
pub fn remove_step(steps: &[WorkflowStep], index: usize) -> Result<Vec<WorkflowStep>, CoreError> {
    check_index(steps, index)?;
    let mut next = steps.to_vec();
    next.remove(index);
    Ok(next)
}

/// Return `steps` with the step at `index` replaced.
pub fn update_step(
    steps: &[WorkflowStep],
    index: usize,
    step: WorkflowStep,
) -> Result<Vec<WorkflowStep>, CoreError> {
    check_index(steps, index)?;
    let mut next = steps.to_vec();
    next[index] = step;
    Ok(next)
}

/// Return `steps` with one parameter of the step at `index` set to `value`.
pub fn update_step_parameter(
    steps: &[WorkflowStep],
    index: usize,
    key: &str,
    value: Value,
) -> Result<Vec<WorkflowStep>, CoreError> {
    check_index(steps, index)?;
    let mut next = steps.to_vec();
    next[index].parameters.insert(key.to_string(), value);
    Ok(next)
}

fn check_index(steps: &[WorkflowStep], index: usize) -> Result<(), CoreError> {
    if index >= steps.len() {
        return Err(CoreError::StepOutOfRange {
            index,
            len: steps.len(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Input selection
// ---------------------------------------------------------------------------

/// Insertion-ordered set of selected input ids.
///
/// Order matters for order-sensitive operations such as concatenation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputSelection {
    selected: IndexSet<InputId>,
}

impl InputSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(&mut self, id: impl Into<InputId>) {
        self.selected.insert(id.into());
    }

    pub fn deselect(&mut self, id: &str) {
        self.selected.shift_remove(id);
    }

    /// Flip the selection state of `id`. Returns `true` if now selected.
    pub fn toggle(&mut self, id: impl Into<InputId>) -> bool {
        let id = id.into();
        if self.selected.shift_remove(&id) {
            false
        } else {
            self.selected.insert(id);
            true
        }
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.contains(id)
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Selected ids in selection order.
    pub fn to_vec(&self) -> Vec<InputId> {
        self.selected.iter().cloned().collect()
    }
}

impl<S: Into<InputId>> FromIterator<S> for InputSelection {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            selected: iter.into_iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Submission payloads
// ---------------------------------------------------------------------------

/// Kind of media the selected inputs are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Video,
    Audio,
}

/// Workflow-level execution flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    pub keep_intermediate_files: bool,
    pub stop_on_error: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            keep_intermediate_files: false,
            stop_on_error: true,
        }
    }
}

/// `parameters` object of a workflow submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowParameters {
    pub steps: Vec<WorkflowStep>,
    pub keep_intermediate_files: bool,
    pub stop_on_error: bool,
}

/// Body of a job submission request.
///
/// `P` is [`WorkflowParameters`] for a workflow and the step's own
/// [`ParameterMap`] for a single-tool job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionPayload<P> {
    pub input_files: Vec<InputId>,
    pub input_type: InputType,
    pub parameters: P,
}

/// Validate and serialize a workflow submission.
pub fn build_workflow_payload(
    selection: &InputSelection,
    input_type: InputType,
    steps: &[WorkflowStep],
    options: WorkflowOptions,
) -> Result<SubmissionPayload<WorkflowParameters>, CoreError> {
    validate_submission(selection, steps.len())?;
    Ok(SubmissionPayload {
        input_files: selection.to_vec(),
        input_type,
        parameters: WorkflowParameters {
            steps: steps.to_vec(),
            keep_intermediate_files: options.keep_intermediate_files,
            stop_on_error: options.stop_on_error,
        },
    })
}

/// Validate and serialize a single-tool submission.
pub fn build_tool_payload(
    selection: &InputSelection,
    input_type: InputType,
    step: &WorkflowStep,
) -> Result<SubmissionPayload<ParameterMap>, CoreError> {
    validate_submission(selection, 1)?;
    Ok(SubmissionPayload {
        input_files: selection.to_vec(),
        input_type,
        parameters: step.parameters.clone(),
    })
}

fn validate_submission(selection: &InputSelection, step_count: usize) -> Result<(), CoreError> {
    if selection.is_empty() {
        return Err(CoreError::Validation(
            "At least one input must be selected".to_string(),
        ));
    }
    if step_count == 0 {
        return Err(CoreError::Validation(
            "A workflow needs at least one step".to_string(),
        ));
    }
    Ok(())
}
