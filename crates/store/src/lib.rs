//! Client-side job reconciliation store.
//!
//! [`JobStore`] is the authoritative table of known jobs plus the latest
//! progress sample per job. Every streamed update is treated as a full
//! snapshot of the job's current state, never as a delta, so a dropped
//! or reordered frame cannot corrupt what the UI shows.
//!
//! [`SharedJobStore`] wires a store into a
//! [`Dispatcher`](mediadeck_events::Dispatcher) as a permanent subscriber
//! and publishes a revision counter for re-rendering.

pub mod sample;
pub mod shared;
pub mod store;

pub use sample::{JobView, ProgressSample};
pub use shared::SharedJobStore;
pub use store::{ApplyOutcome, JobStore, DEFAULT_HISTORY_CAP};
