//! WebSocket message adaptation.
//!
//! Reduces the raw tungstenite message stream to the text frames the
//! dispatcher understands, plus heartbeats for liveness tracking.

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::{ConnectionError, Inbound};

/// Yield the payload of every text frame and a heartbeat for every
/// ping or pong.
///
/// Binary and raw frames are skipped; tungstenite answers pings itself.
/// A close frame ends the stream. A receive error is yielded once and
/// the caller is expected to stop reading.
pub fn inbound_frames<S>(stream: S) -> impl Stream<Item = Result<Inbound, ConnectionError>> + Send
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin + 'static,
{
    futures::stream::unfold(stream, |mut stream| async move {
        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => return Some((Ok(Inbound::Text(text)), stream)),
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    return Some((Ok(Inbound::Heartbeat), stream));
                }
                Ok(Message::Binary(data)) => {
                    tracing::trace!(len = data.len(), "Ignoring binary frame");
                }
                Ok(Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::info!(?frame, "Event stream closed by server");
                    return None;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event stream receive error");
                    return Some((Err(ConnectionError::Protocol(e.to_string())), stream));
                }
            }
        }
    })
}
