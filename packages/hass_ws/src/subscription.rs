use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::demux::{ConsumerRegistry, EventStream};
use crate::error::Result;
use crate::id::next_id;
use crate::protocol::OutboundMessage;
use crate::writer::DuplexWriter;

/// Event categories this connection has subscribed to, and the listeners
/// reading them.
pub struct SubscriptionRegistry {
    writer: Arc<DuplexWriter>,
    consumers: Arc<ConsumerRegistry>,
    subscribed: Mutex<BTreeSet<String>>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(writer: Arc<DuplexWriter>, consumers: Arc<ConsumerRegistry>) -> Self {
        Self {
            writer,
            consumers,
            subscribed: Mutex::new(BTreeSet::new()),
        }
    }

    /// Send `subscribe_events` for `event_type` unless this connection
    /// already has. Returns whether a frame was sent.
    ///
    /// A failed write leaves the type untracked so the caller can retry.
    /// Outside `Ready` this fails with `NotConnected`, tracked or not.
    pub async fn subscribe(&self, event_type: &str) -> Result<bool> {
        // Held across the write so two concurrent calls cannot both send.
        let mut subscribed = self.subscribed.lock().await;
        // A tracked type is only a no-op while the connection is usable.
        self.writer.ensure_ready()?;
        if subscribed.contains(event_type) {
            return Ok(false);
        }
        let id = next_id();
        self.writer
            .write(&OutboundMessage::SubscribeEvents {
                id,
                event_type: event_type.to_string(),
            })
            .await?;
        debug!(id, event_type, "subscribed to event type");
        subscribed.insert(event_type.to_string());
        Ok(true)
    }

    /// Stream every `event` frame whose `event.event_type` is `event_type`.
    ///
    /// The stream keeps filtering for the life of the connection and ends
    /// when it closes. It does not subscribe by itself.
    pub fn listen(&self, event_type: &str) -> Result<EventStream> {
        self.consumers.add_listener(event_type)
    }

    pub async fn subscribed_event_types(&self) -> Vec<String> {
        self.subscribed.lock().await.iter().cloned().collect()
    }
}
