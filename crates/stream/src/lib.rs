//! Event-stream connection management and the jobs HTTP client.
//!
//! - [`client`]: the [`Connector`] transport seam and its WebSocket
//!   implementation.
//! - [`processor`]: adapts raw WebSocket messages into inbound frames.
//! - [`reconnect`]: reconnect delay policy and liveness deadlines.
//! - [`manager`]: the [`ConnectionManager`] lifecycle: connect,
//!   disconnect, scheduled reconnects and resync hooks.
//! - [`api`]: REST wrapper for job submission, cancellation and listing.
//! - [`config`]: environment-driven configuration.
//! - [`session`]: the connection, store and API wired together.

pub mod api;
pub mod client;
pub mod config;
pub mod manager;
pub mod processor;
pub mod reconnect;
pub mod session;

pub use api::{ApiError, JobsApi};
pub use client::{Connection, ConnectionError, Connector, Inbound, Outbound, WsConnector};
pub use config::{ConfigError, StreamConfig};
pub use manager::{ConnectionManager, ManagerOptions, ReconnectHook};
pub use reconnect::{BackoffConfig, Liveness, ReconnectPolicy};
pub use session::{SubmitError, SyncSession};
