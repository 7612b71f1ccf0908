use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::demux::ConsumerRegistry;
use crate::error::Result;
use crate::protocol::{OutboundMessage, ServiceCall, ServiceResponse};
use crate::writer::DuplexWriter;

/// Issues `call_service` commands and, when a response is requested, waits
/// for the `result` frame with the call's id.
pub struct ServiceCaller {
    writer: Arc<DuplexWriter>,
    consumers: Arc<ConsumerRegistry>,
    default_timeout: Option<Duration>,
}

impl ServiceCaller {
    pub(crate) fn new(
        writer: Arc<DuplexWriter>,
        consumers: Arc<ConsumerRegistry>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            writer,
            consumers,
            default_timeout,
        }
    }

    /// Call with the session's default deadline.
    pub async fn call(&self, call: ServiceCall) -> Result<ServiceResponse> {
        self.call_with_timeout(call, self.default_timeout).await
    }

    /// Call with an explicit deadline (`None` waits until the result arrives
    /// or the connection closes).
    ///
    /// Without `return_response` the command is written and an empty
    /// response returned at once. A call whose id is already awaiting a
    /// result fails with `DuplicateCallId` and is not sent.
    pub async fn call_with_timeout(
        &self,
        call: ServiceCall,
        timeout: Option<Duration>,
    ) -> Result<ServiceResponse> {
        let id = call.id;
        if !call.return_response {
            self.writer.write(&OutboundMessage::CallService(call)).await?;
            debug!(id, "sent service call");
            return Ok(ServiceResponse::default());
        }

        // Registered before writing so a fast reply cannot slip past.
        let pending = self.consumers.register_pending(id)?;
        self.writer.write(&OutboundMessage::CallService(call)).await?;
        debug!(id, "sent service call, awaiting result");

        let envelope = pending.wait(timeout).await?;
        ServiceResponse::from_envelope(id, &envelope)
    }
}
