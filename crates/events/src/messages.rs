//! Inbound event-stream frames and their classifier.
//!
//! The backend sends JSON objects with no `type` envelope, so the frame
//! kind is inferred from its shape. [`decode`] tries each known variant in
//! a fixed priority order (metadata, then download progress, then tools
//! progress) and [`classify`] reduces the result to a [`Category`].
//! Anything that matches no variant is [`Category::Unknown`] and is never
//! dispatched.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use mediadeck_core::{JobId, JobStatus};

/// Routing category of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Metadata,
    Progress,
    ToolsProgress,
    Unknown,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Progress => "progress",
            Self::ToolsProgress => "tools-progress",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{metadata: {...}}`: media metadata resolved by a download job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetadataFrame {
    pub metadata: Value,
    #[serde(rename = "jobID", default, deserialize_with = "opt_lenient_string")]
    pub job_id: Option<JobId>,
}

/// Download job-stream progress.
///
/// `jobType` is what separates this shape from a tools frame, which
/// also carries `jobID` and `progress`. It is required: a bare
/// `{jobID, progress}` with neither `jobType` nor `status` is ambiguous
/// and classifies as unknown rather than as download progress.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressFrame {
    #[serde(rename = "jobID", deserialize_with = "lenient_string")]
    pub job_id: JobId,
    #[serde(rename = "jobType")]
    pub job_type: String,
    #[serde(rename = "currentItem", default)]
    pub current_item: u32,
    #[serde(rename = "totalItems", default)]
    pub total_items: u32,
    pub progress: f64,
    #[serde(rename = "currentVideoProgress", default)]
    pub current_video_progress: f64,
}

/// Post-processing tools pipeline progress.
///
/// Times are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolsProgressFrame {
    #[serde(rename = "jobID", deserialize_with = "lenient_string")]
    pub job_id: JobId,
    #[serde(default)]
    pub operation_type: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    #[serde(default, deserialize_with = "opt_lenient_string")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub time_elapsed: Option<f64>,
    #[serde(default)]
    pub time_remaining: Option<f64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A classified frame.
///
/// Variant order is the decode priority: serde tries them top to bottom.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Metadata(MetadataFrame),
    Progress(ProgressFrame),
    ToolsProgress(ToolsProgressFrame),
}

impl StreamMessage {
    pub fn category(&self) -> Category {
        match self {
            Self::Metadata(_) => Category::Metadata,
            Self::Progress(_) => Category::Progress,
            Self::ToolsProgress(_) => Category::ToolsProgress,
        }
    }

    /// The job this frame refers to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Metadata(frame) => frame.job_id.as_deref(),
            Self::Progress(frame) => Some(&frame.job_id),
            Self::ToolsProgress(frame) => Some(&frame.job_id),
        }
    }
}

/// Parse one text frame into a JSON value.
pub fn parse_frame(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(text)
}

/// Decode a frame into its typed variant, or `None` if unrecognized.
pub fn decode(raw: &Value) -> Option<StreamMessage> {
    if !raw.is_object() {
        return None;
    }
    StreamMessage::deserialize(raw).ok()
}

/// Structural classification of a frame. Never fails.
pub fn classify(raw: &Value) -> Category {
    decode(raw)
        .map(|msg| msg.category())
        .unwrap_or(Category::Unknown)
}

// ---- lenient string decoding ----

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Int(i64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
        }
    }
}

/// Job ids are strings, but some emitters send integers.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(Into::into)
}

fn opt_lenient_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Option::<StringOrNumber>::deserialize(deserializer).map(|v| v.map(Into::into))
}
