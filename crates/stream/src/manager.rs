//! Lifecycle of the single event-stream connection.
//!
//! [`ConnectionManager`] owns at most one live connection. Each
//! connection runs in its own reader task tagged with a generation
//! number; callbacks from a superseded generation are ignored. When a
//! connection closes without an explicit [`disconnect`], exactly one
//! reconnect attempt is scheduled after the policy delay, and so on
//! until an attempt opens. Resync hooks registered with
//! [`on_reconnect`] run once per successful reconnect.
//!
//! A connect attempt that outlasts [`Liveness::connect_timeout`], or an
//! open connection that stays silent past [`Liveness::idle_timeout`],
//! counts as a close. Pings go out every [`Liveness::ping_interval`] so
//! a healthy but quiet peer keeps answering.
//!
//! Transport errors are never surfaced; they are logged and degrade to
//! a close.
//!
//! [`disconnect`]: ConnectionManager::disconnect
//! [`on_reconnect`]: ConnectionManager::on_reconnect

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use mediadeck_events::Dispatcher;

use crate::client::{Connection, ConnectionError, Connector, Inbound, Outbound, WsConnector};
use crate::reconnect::{Liveness, ReconnectPolicy};

/// Grace period for sending a close frame on an explicit disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type ResyncCallback = Arc<dyn Fn() + Send + Sync>;

/// Timing knobs for a [`ConnectionManager`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManagerOptions {
    pub reconnect: ReconnectPolicy,
    pub liveness: Liveness,
}

impl From<ReconnectPolicy> for ManagerOptions {
    fn from(reconnect: ReconnectPolicy) -> Self {
        Self {
            reconnect,
            ..Self::default()
        }
    }
}

/// Cloneable handle to one managed event-stream connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    connector: Arc<dyn Connector>,
    url: String,
    policy: ReconnectPolicy,
    liveness: Liveness,
    dispatcher: Dispatcher,
    state: Mutex<State>,
    hooks: Mutex<Hooks>,
}

#[derive(Default)]
struct State {
    socket: Option<Socket>,
    connected: bool,
    reconnecting: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    next_generation: u64,
    /// Consecutive closes since the last successful open.
    failures: u32,
}

struct Socket {
    generation: u64,
    open: bool,
    cancel: CancellationToken,
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Hooks {
    next_id: u64,
    callbacks: Vec<(u64, ResyncCallback)>,
}

/// Handle to a registered resync callback.
///
/// Dropping the handle leaves the callback registered; call
/// [`ReconnectHook::remove`] to unregister it.
#[derive(Debug)]
pub struct ReconnectHook {
    inner: Weak<Inner>,
    id: u64,
}

impl ReconnectHook {
    /// Unregister the callback. No-op if the manager is gone.
    pub fn remove(self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock_hooks().callbacks.retain(|(id, _)| *id != self.id);
        }
    }
}

impl ConnectionManager {
    /// Manager for a WebSocket endpoint with the default fixed-interval
    /// reconnect policy and liveness deadlines.
    pub fn new(url: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self::with_connector(
            Arc::new(WsConnector),
            url,
            dispatcher,
            ManagerOptions::default(),
        )
    }

    /// Manager over any transport. Accepts a bare [`ReconnectPolicy`]
    /// when the default liveness deadlines will do.
    pub fn with_connector(
        connector: Arc<dyn Connector>,
        url: impl Into<String>,
        dispatcher: Dispatcher,
        options: impl Into<ManagerOptions>,
    ) -> Self {
        let options = options.into();
        Self {
            inner: Arc::new(Inner {
                connector,
                url: url.into(),
                policy: options.reconnect,
                liveness: options.liveness,
                dispatcher,
                state: Mutex::new(State::default()),
                hooks: Mutex::new(Hooks::default()),
            }),
        }
    }

    /// Open the connection.
    ///
    /// No-op while a connection is open. A connection that exists but
    /// has not opened yet is torn down and replaced. Must be called from
    /// within a tokio runtime.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Safe to call when already disconnected. Does not schedule a
    /// reconnect.
    pub fn disconnect(&self) {
        let mut state = self.inner.lock_state();
        if let Some(socket) = state.socket.take() {
            socket.cancel.cancel();
        }
        if let Some(timer) = state.reconnect_timer.take() {
            timer.abort();
        }
        state.connected = false;
        tracing::info!(url = %self.inner.url, "Disconnected from event stream");
    }

    /// Register a callback that runs after every successful reconnect
    /// (never after the initial connect).
    ///
    /// Callbacks run synchronously on the reader task, outside any lock.
    /// A panicking callback is logged and does not affect the others.
    pub fn on_reconnect<F>(&self, callback: F) -> ReconnectHook
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut hooks = self.inner.lock_hooks();
        hooks.next_id += 1;
        let id = hooks.next_id;
        hooks.callbacks.push((id, Arc::new(callback)));
        ReconnectHook {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Send a text frame on the open connection.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        let state = self.inner.lock_state();
        match &state.socket {
            Some(socket) if socket.open => socket
                .outbound
                .send(text.into())
                .map_err(|_| ConnectionError::NotConnected),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connected
    }

    /// Whether the manager is recovering from a dropped connection.
    ///
    /// Set when a scheduled reconnect attempt fires; cleared once a
    /// connection opens and the resync callbacks have run.
    pub fn is_reconnecting(&self) -> bool {
        self.inner.lock_state().reconnecting
    }

    /// Whether a reconnect attempt is scheduled but has not fired yet.
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner.lock_state().reconnect_timer.is_some()
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.url)
            .field("policy", &self.inner.policy)
            .field("liveness", &self.inner.liveness)
            .field("connected", &self.is_connected())
            .field("reconnecting", &self.is_reconnecting())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn connect(self: &Arc<Self>) {
        let mut state = self.lock_state();

        if let Some(socket) = &state.socket {
            if socket.open {
                tracing::debug!(url = %self.url, "Already connected");
                return;
            }
            tracing::debug!(
                generation = socket.generation,
                "Replacing connection that never opened",
            );
            socket.cancel.cancel();
        }

        state.next_generation += 1;
        let generation = state.next_generation;
        let cancel = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        state.socket = Some(Socket {
            generation,
            open: false,
            cancel: cancel.clone(),
            outbound,
        });
        drop(state);

        tracing::info!(url = %self.url, generation, "Connecting to event stream");
        tokio::spawn(run_socket(Arc::clone(self), generation, cancel, outbound_rx));
    }

    /// Mark `generation` open. Returns false if it was superseded.
    fn handle_open(&self, generation: u64) -> bool {
        let was_reconnecting = {
            let mut state = self.lock_state();
            match state.socket.as_mut() {
                Some(socket) if socket.generation == generation => socket.open = true,
                _ => return false,
            }
            state.connected = true;
            state.failures = 0;
            if let Some(timer) = state.reconnect_timer.take() {
                timer.abort();
            }
            state.reconnecting
        };

        if was_reconnecting {
            tracing::info!(url = %self.url, "Reconnected to event stream");
            self.run_resync_hooks();
            self.lock_state().reconnecting = false;
        }
        true
    }

    /// Record that `generation` closed and schedule a reconnect unless
    /// one is already pending.
    fn handle_close(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock_state();
        match &state.socket {
            Some(socket) if socket.generation == generation => {}
            _ => return,
        }
        state.socket = None;
        state.connected = false;

        if state.reconnect_timer.is_some() {
            return;
        }

        state.failures = state.failures.saturating_add(1);
        let delay = self.policy.delay_for(state.failures);
        tracing::warn!(
            url = %self.url,
            failures = state.failures,
            delay_ms = delay.as_millis() as u64,
            "Event stream closed, scheduling reconnect",
        );

        let inner = Arc::clone(self);
        state.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect();
        }));
    }

    fn fire_reconnect(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            // Cancelled between the timer expiring and taking the lock.
            if state.reconnect_timer.take().is_none() {
                return;
            }
            state.reconnecting = true;
        }
        self.connect();
    }

    fn run_resync_hooks(&self) {
        let callbacks: Vec<ResyncCallback> = self
            .lock_hooks()
            .callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            if panic::catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                tracing::error!(url = %self.url, "Reconnect callback panicked");
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_hooks(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drive one connection generation from connect attempt to close.
async fn run_socket(
    inner: Arc<Inner>,
    generation: u64,
    cancel: CancellationToken,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let liveness = inner.liveness;
    let attempt = tokio::select! {
        _ = cancel.cancelled() => return,
        result = time::timeout(liveness.connect_timeout, inner.connector.connect(&inner.url)) => {
            result.unwrap_or_else(|_| Err(ConnectionError::Timeout(liveness.connect_timeout)))
        }
    };

    let Connection {
        mut incoming,
        mut outgoing,
    } = match attempt {
        Ok(connection) => connection,
        Err(e) => {
            tracing::warn!(url = %inner.url, error = %e, "Event stream connection failed");
            inner.handle_close(generation);
            return;
        }
    };

    if !inner.handle_open(generation) {
        return;
    }

    let mut pings = liveness.ping_interval.map(|period| {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut last_seen = Instant::now();

    loop {
        let deadline = liveness.idle_timeout.map(|idle| last_seen + idle);

        tokio::select! {
            _ = cancel.cancelled() => {
                if time::timeout(CLOSE_TIMEOUT, outgoing.close()).await.is_err() {
                    tracing::debug!(generation, "Timed out closing event stream");
                }
                return;
            }
            frame = incoming.next() => match frame {
                Some(Ok(frame)) => {
                    last_seen = Instant::now();
                    if let Inbound::Text(text) = frame {
                        inner.dispatcher.dispatch_text(&text);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(generation, error = %e, "Event stream error");
                    break;
                }
                None => {
                    tracing::info!(generation, "Event stream ended");
                    break;
                }
            },
            Some(text) = outbound.recv() => {
                if let Err(e) = outgoing.send(Outbound::Text(text)).await {
                    tracing::warn!(generation, error = %e, "Failed to send frame");
                    break;
                }
            }
            _ = next_tick(&mut pings) => {
                if let Err(e) = outgoing.send(Outbound::Ping).await {
                    tracing::warn!(generation, error = %e, "Failed to send ping");
                    break;
                }
            }
            _ = expired(deadline) => {
                tracing::warn!(
                    generation,
                    silent_ms = last_seen.elapsed().as_millis() as u64,
                    "Event stream went silent, dropping connection",
                );
                break;
            }
        }
    }

    inner.handle_close(generation);
}

/// Next ping tick, or never when pings are off.
async fn next_tick(pings: &mut Option<Interval>) {
    match pings {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
