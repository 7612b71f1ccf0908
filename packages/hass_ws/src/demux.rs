//! Inbound demultiplexer: the single reader of the connection and the
//! registry of everything waiting on what it reads.
//!
//! Consumers come in three kinds:
//!
//! - pending calls, keyed by message id, each completed at most once by a
//!   `result` frame carrying that id;
//! - event listeners, each receiving every `event` frame whose
//!   `event.event_type` matches the listener's;
//! - frame taps, receiving every decoded envelope.
//!
//! Listener and tap queues are bounded. The read loop never waits on a
//! consumer: when a queue is full the newest frame is dropped for that
//! consumer only and a warning is logged. Pending calls use a oneshot, which
//! never fills.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{HassError, Result};
use crate::protocol::{Envelope, EventData, TYPE_RESULT};
use crate::session::ConnectionState;
use crate::transport::{FrameSource, frame_payload};

struct Pending {
    key: u64,
    tx: oneshot::Sender<Envelope>,
}

struct Listener {
    event_type: String,
    tx: mpsc::Sender<EventData>,
}

#[derive(Default)]
struct Consumers {
    closed: bool,
    next_key: u64,
    pending: HashMap<i64, Pending>,
    listeners: HashMap<u64, Listener>,
    taps: HashMap<u64, mpsc::Sender<Envelope>>,
}

impl Consumers {
    fn key(&mut self) -> u64 {
        self.next_key += 1;
        self.next_key
    }
}

/// Registration structure shared between the read loop and callers.
///
/// Guarded by a plain mutex: it is never held across an await, and consumer
/// handles deregister themselves from `Drop`.
pub(crate) struct ConsumerRegistry {
    inner: Mutex<Consumers>,
    capacity: usize,
}

impl ConsumerRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Consumers::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Consumers> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start waiting for the `result` frame of call `id`. At most one call
    /// can wait on a given id.
    pub(crate) fn register_pending(self: &Arc<Self>, id: i64) -> Result<PendingCall> {
        let (tx, rx) = oneshot::channel();
        let mut consumers = self.lock();
        if consumers.closed {
            return Err(HassError::NotConnected);
        }
        if consumers.pending.contains_key(&id) {
            return Err(HassError::DuplicateCallId { id });
        }
        let key = consumers.key();
        consumers.pending.insert(id, Pending { key, tx });
        Ok(PendingCall {
            id,
            key,
            rx,
            registry: self.clone(),
        })
    }

    pub(crate) fn add_listener(self: &Arc<Self>, event_type: &str) -> Result<EventStream> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut consumers = self.lock();
        if consumers.closed {
            return Err(HassError::NotConnected);
        }
        let key = consumers.key();
        consumers.listeners.insert(
            key,
            Listener {
                event_type: event_type.to_string(),
                tx,
            },
        );
        Ok(EventStream {
            event_type: event_type.to_string(),
            key,
            rx,
            registry: self.clone(),
        })
    }

    pub(crate) fn add_tap(self: &Arc<Self>) -> Result<FrameStream> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut consumers = self.lock();
        if consumers.closed {
            return Err(HassError::NotConnected);
        }
        let key = consumers.key();
        consumers.taps.insert(key, tx);
        Ok(FrameStream {
            key,
            rx,
            registry: self.clone(),
        })
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    /// Route one decoded frame to every consumer interested in it.
    pub(crate) fn dispatch(&self, envelope: Envelope) {
        let event_type = envelope.event_type();
        let mut consumers = self.lock();
        if consumers.closed {
            return;
        }

        consumers.taps.retain(|key, tx| match tx.try_send(envelope.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(tap = key, msg_type = %envelope.msg_type, "frame tap is full, dropping frame");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if let Some(event_type) = event_type {
            consumers.listeners.retain(|key, listener| {
                if listener.event_type != event_type {
                    return true;
                }
                let data = EventData {
                    event_type: event_type.clone(),
                    raw: envelope.raw.to_vec(),
                };
                match listener.tx.try_send(data) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(listener = key, %event_type, "event listener is full, dropping event");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }

        if envelope.msg_type == TYPE_RESULT {
            let Some(id) = envelope.id else {
                return;
            };
            match consumers.pending.remove(&id) {
                Some(pending) => {
                    // The caller may have given up in the meantime.
                    let _ = pending.tx.send(envelope);
                }
                None => debug!(id, "no pending call for result frame"),
            }
        }
    }

    /// Refuse new consumers and drop every sender, so pending calls fail
    /// and listener streams end.
    pub(crate) fn close(&self) {
        let mut consumers = self.lock();
        consumers.closed = true;
        consumers.pending.clear();
        consumers.listeners.clear();
        consumers.taps.clear();
    }

    /// Remove call `id` only if the entry still belongs to the caller
    /// holding `key`; a later call may have reused the id.
    fn remove_pending(&self, id: i64, key: u64) {
        let mut consumers = self.lock();
        if consumers.pending.get(&id).is_some_and(|p| p.key == key) {
            consumers.pending.remove(&id);
        }
    }

    fn remove_listener(&self, key: u64) {
        self.lock().listeners.remove(&key);
    }

    fn remove_tap(&self, key: u64) {
        self.lock().taps.remove(&key);
    }
}

/// A call waiting for its result frame. Dropping it deregisters the call.
pub(crate) struct PendingCall {
    id: i64,
    key: u64,
    rx: oneshot::Receiver<Envelope>,
    registry: Arc<ConsumerRegistry>,
}

impl PendingCall {
    pub(crate) async fn wait(mut self, timeout: Option<Duration>) -> Result<Envelope> {
        let id = self.id;
        let received = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, &mut self.rx)
                .await
                .map_err(|_| HassError::CallTimeout { id, timeout })?,
            None => (&mut self.rx).await,
        };
        received.map_err(|_| HassError::ResponseChannelClosed { id })
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.registry.remove_pending(self.id, self.key);
    }
}

/// Events of one type, in arrival order. Ends when the session closes.
///
/// Dropping the stream deregisters the listener.
pub struct EventStream {
    event_type: String,
    key: u64,
    rx: mpsc::Receiver<EventData>,
    registry: Arc<ConsumerRegistry>,
}

impl EventStream {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub async fn recv(&mut self) -> Option<EventData> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = EventData;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<EventData>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.registry.remove_listener(self.key);
    }
}

/// Every decoded inbound envelope. Ends when the session closes.
pub struct FrameStream {
    key: u64,
    rx: mpsc::Receiver<Envelope>,
    registry: Arc<ConsumerRegistry>,
}

impl FrameStream {
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

impl Stream for FrameStream {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Envelope>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        self.registry.remove_tap(self.key);
    }
}

/// The read loop. Runs until the transport fails or ends, the hub sends a
/// close frame, or `shutdown` is cancelled; then closes every consumer and
/// marks the session closed.
pub(crate) async fn run_reader(
    mut source: FrameSource,
    registry: Arc<ConsumerRegistry>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("read loop cancelled");
                break;
            }
            frame = source.next() => frame,
        };

        match frame {
            Some(Ok(Message::Close(close))) => {
                info!(?close, "hub closed the connection");
                break;
            }
            Some(Ok(message)) => {
                if let Some(payload) = frame_payload(&message) {
                    handle_frame(payload, &registry);
                }
            }
            Some(Err(e)) => {
                error!(error = %e, "error reading from websocket");
                break;
            }
            None => {
                info!("websocket stream ended");
                break;
            }
        }
    }

    registry.close();
    state.send_replace(ConnectionState::Closed);
}

fn handle_frame(payload: &[u8], registry: &ConsumerRegistry) {
    match Envelope::decode(payload) {
        Ok(envelope) => {
            if !envelope.success {
                warn!(
                    id = ?envelope.id,
                    response = %String::from_utf8_lossy(payload),
                    "received unsuccessful response"
                );
            }
            registry.dispatch(envelope);
        }
        Err(e) => {
            let err = HassError::MalformedFrame(e);
            warn!(error = %err, "dropping inbound frame");
        }
    }
}
