/// Job identifiers are opaque strings assigned by the backend.
pub type JobId = String;

/// Identifier of a selectable input file (video or audio) in the library.
pub type InputId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
