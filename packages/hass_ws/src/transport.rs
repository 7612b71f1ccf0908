//! The duplex frame channel a session runs over.

use std::pin::Pin;

use futures::{Sink, Stream};
use tokio_tungstenite::tungstenite::{self, Message};

/// Write half of a connected transport.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Read half of a connected transport.
pub type FrameSource = Pin<Box<dyn Stream<Item = Result<Message, tungstenite::Error>> + Send>>;

/// Anything that can carry WebSocket frames both ways, e.g. a
/// `tokio_tungstenite::WebSocketStream` over TCP, TLS, or an in-memory duplex.
pub trait Transport:
    Stream<Item = Result<Message, tungstenite::Error>>
    + Sink<Message, Error = tungstenite::Error>
    + Send
    + Unpin
    + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static
{
}

/// Payload bytes of a data frame, `None` for control frames.
pub(crate) fn frame_payload(message: &Message) -> Option<&[u8]> {
    match message {
        Message::Text(text) => Some(text.as_str().as_bytes()),
        Message::Binary(bytes) => Some(&bytes[..]),
        _ => None,
    }
}
