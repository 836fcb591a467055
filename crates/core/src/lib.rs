//! Domain model shared by the MediaDeck sync crates.
//!
//! - [`job`]: the canonical job record and its status transition graph.
//! - [`workflow`]: the chainable tool-step catalog, presets and the
//!   submission payload builder.

pub mod error;
pub mod job;
pub mod types;
pub mod workflow;

pub use error::CoreError;
pub use job::{Job, JobStatus};
pub use types::{InputId, JobId, Timestamp};
