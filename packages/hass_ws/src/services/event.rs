use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::Result;
use crate::id::next_id;
use crate::protocol::OutboundMessage;
use crate::writer::DuplexWriter;

/// Fires events on the hub's event bus.
pub struct EventService {
    writer: Arc<DuplexWriter>,
}

impl EventService {
    pub(crate) fn new(writer: Arc<DuplexWriter>) -> Self {
        Self { writer }
    }

    /// Fire `event_type`, optionally with `event_data`. Fire-and-forget: the
    /// hub's acknowledgement is not awaited.
    pub async fn fire(&self, event_type: &str, event_data: Option<Map<String, Value>>) -> Result<i64> {
        let id = next_id();
        self.writer
            .write(&OutboundMessage::FireEvent {
                id,
                event_type: event_type.to_string(),
                event_data,
            })
            .await?;
        debug!(id, event_type, "fired event");
        Ok(id)
    }
}
