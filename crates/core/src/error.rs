#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Step index {index} out of range (workflow has {len} steps)")]
    StepOutOfRange { index: usize, len: usize },

    #[error("Unknown {kind} '{name}'")]
    UnknownName { kind: &'static str, name: String },
}
