//! In-process publish/subscribe dispatcher for classified stream frames.
//!
//! [`Dispatcher`] keeps one ordered callback registry per [`Topic`] and
//! fans each recognized frame out synchronously: first to the frame's own
//! category, then to [`Topic::All`]. Unrecognized frames reach nobody.
//!
//! Callbacks run outside the registry lock, so a callback may subscribe
//! or unsubscribe without deadlocking. A panicking callback is caught and
//! logged; the remaining callbacks of the same dispatch still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;

use crate::messages::{decode, parse_frame, Category, StreamMessage};

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// What a subscriber listens to: one category, or every recognized frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Category(Category),
    All,
}

impl From<Category> for Topic {
    fn from(category: Category) -> Self {
        Self::Category(category)
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Category(category) => f.write_str(category.as_str()),
            Self::All => f.write_str("all"),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Callback = Arc<dyn Fn(&StreamMessage) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    topics: HashMap<Topic, Vec<(u64, Callback)>>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle returned by [`Dispatcher::subscribe`].
///
/// Dropping the handle keeps the callback registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove exactly this callback. Other subscriptions, including ones
    /// on the same topic, are unaffected.
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = lock(&registry);
        if let Some(callbacks) = registry.topics.get_mut(&self.topic) {
            callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Per-category fan-out hub.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `topic`. Callbacks on a topic run in
    /// registration order.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, callback: F) -> Subscription
    where
        F: Fn(&StreamMessage) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .topics
            .entry(topic)
            .or_default()
            .push((id, Arc::new(callback)));

        tracing::debug!(%topic, subscription_id = id, "Subscriber registered");

        Subscription {
            registry: Arc::downgrade(&self.registry),
            topic,
            id,
        }
    }

    /// Number of callbacks currently registered for `topic`.
    pub fn subscriber_count(&self, topic: impl Into<Topic>) -> usize {
        lock(&self.registry)
            .topics
            .get(&topic.into())
            .map_or(0, Vec::len)
    }

    /// Classify a decoded frame and fan it out.
    ///
    /// Returns the category the frame was routed to; `Unknown` frames
    /// are dropped without invoking anyone.
    pub fn dispatch(&self, raw: &Value) -> Category {
        match decode(raw) {
            Some(message) => {
                self.publish(&message);
                message.category()
            }
            None => {
                tracing::debug!("Dropping unrecognized frame");
                Category::Unknown
            }
        }
    }

    /// Parse, classify and fan out one raw text frame.
    ///
    /// Malformed JSON is logged and dropped.
    pub fn dispatch_text(&self, text: &str) -> Category {
        match parse_frame(text) {
            Ok(raw) => self.dispatch(&raw),
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Failed to parse stream frame");
                Category::Unknown
            }
        }
    }

    /// Deliver an already-classified message: category subscribers first,
    /// then wildcard subscribers. Returns how many callbacks ran.
    ///
    /// A callback unsubscribed by an earlier one during the same publish
    /// is skipped.
    pub fn publish(&self, message: &StreamMessage) -> usize {
        let callbacks = self.snapshot(message.category());
        let mut count = 0;

        for (topic, id, callback) in callbacks {
            if !self.is_registered(topic, id) {
                continue;
            }
            count += 1;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(message))) {
                tracing::error!(
                    %topic,
                    subscription_id = id,
                    panic = panic_message(panic.as_ref()),
                    "Subscriber panicked during dispatch",
                );
            }
        }

        count
    }

    fn is_registered(&self, topic: Topic, id: u64) -> bool {
        lock(&self.registry)
            .topics
            .get(&topic)
            .is_some_and(|callbacks| callbacks.iter().any(|(cb_id, _)| *cb_id == id))
    }

    /// Copy out the callbacks to invoke so the lock is not held while
    /// they run.
    fn snapshot(&self, category: Category) -> Vec<(Topic, u64, Callback)> {
        let registry = lock(&self.registry);
        [Topic::Category(category), Topic::All]
            .into_iter()
            .flat_map(|topic| {
                registry
                    .topics
                    .get(&topic)
                    .into_iter()
                    .flatten()
                    .map(move |(id, cb)| (topic, *id, Arc::clone(cb)))
            })
            .collect()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        let counts: HashMap<String, usize> = registry
            .topics
            .iter()
            .map(|(topic, cbs)| (topic.to_string(), cbs.len()))
            .collect();
        f.debug_struct("Dispatcher").field("subscribers", &counts).finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(
        dispatcher: &Dispatcher,
        topic: impl Into<Topic>,
    ) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let sub = dispatcher.subscribe(topic, move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        (hits, sub)
    }

    #[test]
    fn routes_to_category_then_wildcard() {
        let dispatcher = Dispatcher::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let _all = dispatcher.subscribe(Topic::All, move |_| o.lock().unwrap().push("all"));
        let o = Arc::clone(&order);
        let _tools = dispatcher.subscribe(Category::ToolsProgress, move |_| {
            o.lock().unwrap().push("tools")
        });

        let frame = json!({"jobID": "j1", "progress": 1, "status": "pending"});
        let category = dispatcher.dispatch(&frame);

        assert_eq!(category, Category::ToolsProgress);
        assert_eq!(*order.lock().unwrap(), vec!["tools", "all"]);
    }

    #[test]
    fn other_categories_are_not_invoked() {
        let dispatcher = Dispatcher::new();
        let (metadata_hits, _m) = counter(&dispatcher, Category::Metadata);
        let (progress_hits, _p) = counter(&dispatcher, Category::Progress);

        dispatcher.dispatch(&json!({"metadata": {"title": "x"}}));

        assert_eq!(metadata_hits.load(Ordering::SeqCst), 1);
        assert_eq!(progress_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_frames_reach_nobody() {
        let dispatcher = Dispatcher::new();
        let (all_hits, _a) = counter(&dispatcher, Topic::All);
        let (unknown_hits, _u) = counter(&dispatcher, Category::Unknown);

        let category = dispatcher.dispatch(&json!({"hello": "world"}));

        assert_eq!(category, Category::Unknown);
        assert_eq!(all_hits.load(Ordering::SeqCst), 0);
        assert_eq!(unknown_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn malformed_text_is_dropped() {
        let dispatcher = Dispatcher::new();
        let (all_hits, _a) = counter(&dispatcher, Topic::All);

        assert_eq!(dispatcher.dispatch_text("{not json"), Category::Unknown);
        assert_eq!(all_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_removes_only_that_callback() {
        let dispatcher = Dispatcher::new();
        let (first, sub_first) = counter(&dispatcher, Category::Metadata);
        let (second, _sub_second) = counter(&dispatcher, Category::Metadata);

        sub_first.unsubscribe();
        dispatcher.dispatch(&json!({"metadata": {}}));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.subscriber_count(Category::Metadata), 1);
    }

    #[test]
    fn unsubscribe_after_dispatcher_dropped_is_harmless() {
        let dispatcher = Dispatcher::new();
        let (_hits, sub) = counter(&dispatcher, Topic::All);
        drop(dispatcher);
        sub.unsubscribe();
    }

    #[test]
    fn callback_may_subscribe_during_dispatch() {
        let dispatcher = Dispatcher::new();
        let inner = dispatcher.clone();
        let _sub = dispatcher.subscribe(Category::Metadata, move |_| {
            let _ = inner.subscribe(Topic::All, |_| {});
        });

        dispatcher.dispatch(&json!({"metadata": {}}));

        assert_eq!(dispatcher.subscriber_count(Topic::All), 1);
    }

    #[test]
    fn callback_unsubscribed_mid_dispatch_is_skipped() {
        let dispatcher = Dispatcher::new();
        let pending: Arc<Mutex<Option<Subscription>>> = Arc::default();

        let slot = Arc::clone(&pending);
        let _first = dispatcher.subscribe(Category::Metadata, move |_| {
            if let Some(sub) = slot.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        let (second, sub_second) = counter(&dispatcher, Category::Metadata);
        let (wildcard, _all) = counter(&dispatcher, Topic::All);
        *pending.lock().unwrap() = Some(sub_second);

        let message = decode(&json!({"metadata": {}})).unwrap();
        let ran = dispatcher.publish(&message);

        assert_eq!(ran, 2);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(wildcard.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.subscriber_count(Category::Metadata), 1);
    }
}
