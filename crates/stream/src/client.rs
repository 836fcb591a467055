//! Transport seam for the backend event stream.
//!
//! [`Connector`] opens one [`Connection`]: a stream of inbound frames
//! plus a sink for outbound ones. Both carry text payloads and a
//! heartbeat, which the manager uses to tell a quiet connection from a
//! dead one. [`WsConnector`] is the real implementation over
//! `tokio-tungstenite`; tests substitute an in-memory connector.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::processor::inbound_frames;

/// A frame received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Proof of life without a payload (a ping or pong on WebSocket).
    Heartbeat,
}

/// A frame to send to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    /// Ask the peer for a heartbeat.
    Ping,
}

/// Inbound frames. The stream ends when the peer closes.
pub type FrameStream = BoxStream<'static, Result<Inbound, ConnectionError>>;

/// Outbound frames.
pub type FrameSink = Pin<Box<dyn Sink<Outbound, Error = ConnectionError> + Send>>;

/// One open, bidirectional connection.
pub struct Connection {
    pub incoming: FrameStream,
    pub outgoing: FrameSink,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens connections to the event stream endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Connection, ConnectionError>;
}

/// [`Connector`] over a WebSocket.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, ConnectionError> {
        let (ws_stream, _response) = connect_async(url).await.map_err(|e| {
            ConnectionError::Connect(format!("Failed to connect to event stream at {url}: {e}"))
        })?;

        tracing::info!(url, "Connected to event stream");

        let (sink, stream) = ws_stream.split();
        let outgoing = sink
            .with(|frame: Outbound| {
                futures::future::ok::<_, tungstenite::Error>(match frame {
                    Outbound::Text(text) => Message::Text(text),
                    Outbound::Ping => Message::Ping(Vec::new()),
                })
            })
            .sink_map_err(|e| ConnectionError::Protocol(e.to_string()));

        Ok(Connection {
            incoming: inbound_frames(stream).boxed(),
            outgoing: Box::pin(outgoing),
        })
    }
}

/// Errors on the event stream transport.
///
/// These never reach the caller of [`ConnectionManager`](crate::ConnectionManager);
/// they degrade to a close and the reconnect path.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Failed to establish the connection.
    #[error("Connection error: {0}")]
    Connect(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connect handshake or the peer went quiet for too long.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// No connection is currently open.
    #[error("Not connected")]
    NotConnected,
}
