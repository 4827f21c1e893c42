//! WebSocket transport
//!
//! A socket is split in two after the upgrade. The read half feeds the
//! session protocol as a [`FrameSource`]; the write half is drained from the
//! session's outbound queue by [`write_frames`], so nothing that publishes to
//! a session ever waits on its socket.

use std::fmt::Display;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace};

use crate::error::{NetworkError, RealmkeepError, Result};
use crate::game::entity::EntityId;
use crate::protocol::connection::FrameSource;

/// Read half of a WebSocket, yielding one frame per data message
pub struct WebSocketSource<S> {
    stream: S,
}

impl<S> WebSocketSource<S>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin + Send,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Read the next data message, skipping control frames
    pub async fn read_message(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => match message {
                    Message::Binary(data) => {
                        trace!(len = data.len(), "Received binary WebSocket message");
                        return Ok(Some(data));
                    }
                    Message::Text(text) => {
                        // Treat text as binary for protocol handling
                        return Ok(Some(text.into_bytes()));
                    }
                    Message::Close(_) => {
                        debug!("WebSocket close message received");
                        return Ok(None);
                    }
                    // Pongs are queued by tungstenite and flushed with the next write
                    Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
                },
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => {
                    return Err(RealmkeepError::Network(NetworkError::WebSocket(e.to_string())));
                }
            }
        }
    }
}

impl<S> FrameSource for WebSocketSource<S>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin + Send,
{
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Vec<u8>>>> {
        self.read_message().boxed()
    }
}

/// Drain a session's outbound queue into the socket until the queue closes.
///
/// Returns the number of frames written.
pub async fn write_frames<K>(mut sink: K, mut outbound: mpsc::Receiver<Bytes>) -> Result<usize>
where
    K: Sink<Message> + Unpin,
    K::Error: Display,
{
    let mut written = 0;
    while let Some(frame) = outbound.recv().await {
        trace!(len = frame.len(), "Sending binary WebSocket message");
        sink.send(Message::Binary(frame.to_vec()))
            .await
            .map_err(|e| RealmkeepError::Network(NetworkError::WebSocket(e.to_string())))?;
        written += 1;
    }
    // Peer may already be gone
    if let Err(e) = sink.close().await {
        debug!(error = %e, "WebSocket close failed");
    }
    Ok(written)
}

/// Player entity named by the upgrade request's `player` query parameter
pub fn parse_player_id(query: Option<&str>) -> std::result::Result<EntityId, NetworkError> {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "player")
        .and_then(|(_, value)| value.parse::<u64>().ok())
        .filter(|id| *id != 0)
        .map(EntityId)
        .ok_or(NetworkError::MissingIdentity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_source_skips_control_frames() {
        let messages: Vec<std::result::Result<Message, WsError>> = vec![
            Ok(Message::Ping(vec![1])),
            Ok(Message::Binary(vec![1, 0])),
            Ok(Message::Text("ab".to_string())),
            Ok(Message::Close(None)),
            Ok(Message::Binary(vec![9])),
        ];
        let mut source = WebSocketSource::new(stream::iter(messages));

        assert_eq!(source.next_frame().await.unwrap(), Some(vec![1, 0]));
        assert_eq!(source.next_frame().await.unwrap(), Some(b"ab".to_vec()));
        assert_eq!(source.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_source_end_of_stream() {
        let mut source = WebSocketSource::new(stream::iter(Vec::<std::result::Result<Message, WsError>>::new()));
        assert_eq!(assert_ok!(source.read_message().await), None);
    }

    #[tokio::test]
    async fn test_write_frames_until_queue_closes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Bytes::from_static(&[1, 2])).await.unwrap();
        tx.send(Bytes::from_static(&[3])).await.unwrap();
        drop(tx);

        let mut sent: Vec<Message> = Vec::new();
        let written = write_frames(&mut sent, rx).await.unwrap();
        assert_eq!(written, 2);
        assert_eq!(sent, vec![Message::Binary(vec![1, 2]), Message::Binary(vec![3])]);
    }

    #[test]
    fn test_parse_player_id() {
        assert_eq!(parse_player_id(Some("player=42")).unwrap(), EntityId(42));
        assert_eq!(parse_player_id(Some("v=2&player=7")).unwrap(), EntityId(7));
        assert_err!(parse_player_id(None));
        assert_err!(parse_player_id(Some("player=abc")));
        assert_err!(parse_player_id(Some("player=0")));
        assert_err!(parse_player_id(Some("name=ada")));
    }
}
