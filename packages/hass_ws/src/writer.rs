use std::sync::Arc;

use futures::SinkExt;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{HassError, Result};
use crate::session::ConnectionState;
use crate::transport::FrameSink;

/// Serializes concurrent writers onto the single write half of the
/// connection. One call produces exactly one text frame; frames from
/// different callers never interleave.
pub struct DuplexWriter {
    sink: Mutex<FrameSink>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl DuplexWriter {
    pub(crate) fn new(sink: FrameSink, state: Arc<watch::Sender<ConnectionState>>) -> Self {
        Self {
            sink: Mutex::new(sink),
            state,
        }
    }

    /// Serialize `message` and transmit it while holding the write lock.
    ///
    /// Transport failures are returned as-is and never retried.
    pub async fn write<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        self.ensure_ready()?;
        let mut sink = self.sink.lock().await;
        // The session may have started closing while we waited for the lock.
        self.ensure_ready()?;
        let json = serde_json::to_string(message)?;
        sink.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Flush and close the write half, sending a close frame to the hub.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await.map_err(HassError::from)
    }

    pub(crate) fn ensure_ready(&self) -> Result<()> {
        if *self.state.borrow() == ConnectionState::Ready {
            Ok(())
        } else {
            Err(HassError::NotConnected)
        }
    }
}
