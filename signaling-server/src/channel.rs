//! Transport-neutral view of the client's websocket.
//!
//! Sessions read `Result<Frame, TransportError>` from a stream and write [Frame]s into a
//! sink, so the session loop can be driven by anything that speaks frames.

use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use warp::ws::{Message, WebSocket};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
    /// Ping, pong and anything else the websocket layer answers on its own.
    Control,
}

impl Frame {
    /// Bytes of a data frame.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Text(text) => Some(text.as_bytes()),
            Frame::Binary(bytes) => Some(bytes),
            Frame::Close | Frame::Control => None,
        }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        if message.is_close() {
            Frame::Close
        } else if let Ok(text) = message.to_str() {
            Frame::Text(text.to_owned())
        } else if message.is_binary() {
            Frame::Binary(message.into_bytes())
        } else {
            Frame::Control
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Text(text) => Message::text(text),
            Frame::Binary(bytes) => Message::binary(bytes),
            Frame::Close => Message::close(),
            Frame::Control => Message::ping(Vec::new()),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] warp::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Split an upgraded websocket into the frame sink and frame stream a session runs on.
pub fn split_websocket(
    ws: WebSocket,
) -> (
    impl Sink<Frame, Error = TransportError> + Send + Unpin + 'static,
    impl Stream<Item = Result<Frame, TransportError>> + Send + Unpin + 'static,
) {
    let (ws_tx, ws_rx) = ws.split();
    let sink = ws_tx
        .sink_map_err(TransportError::from)
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(Message::from(frame))));
    let stream = ws_rx.map(|result| result.map(Frame::from).map_err(TransportError::from));
    (sink, stream)
}
