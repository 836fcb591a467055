//! MediaDeck event-stream classification and in-process dispatch.
//!
//! - [`messages`]: structural classification of inbound frames into
//!   typed [`StreamMessage`] variants.
//! - [`bus`]: the [`Dispatcher`], a per-category publish/subscribe hub
//!   with a wildcard topic.

pub mod bus;
pub mod messages;

pub use bus::{Dispatcher, Subscription, Topic};
pub use messages::{
    classify, decode, Category, MetadataFrame, ProgressFrame, StreamMessage, ToolsProgressFrame,
};
