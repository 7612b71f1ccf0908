//! The authenticated connection and the operations valid on it.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{ConnectOptions, SessionSettings};
use crate::demux::{ConsumerRegistry, EventStream, FrameStream, run_reader};
use crate::error::{HassError, Result};
use crate::handshake;
use crate::protocol::{ServiceCall, ServiceResponse, ServiceTarget};
use crate::services::{EventService, ServiceCaller};
use crate::subscription::SubscriptionRegistry;
use crate::transport::{FrameSink, FrameSource, Transport};
use crate::writer::DuplexWriter;

/// How long `close` waits for the close frame to go out.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Connection lifecycle:
/// `Disconnected → Handshaking → Ready → Closing → Closed`.
///
/// Commands are only accepted in `Ready`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

/// An authenticated connection to the hub.
///
/// All writes go through one [`DuplexWriter`]; a single background task
/// owns all reads. The session can be shared (`Arc<Session>`) between any
/// number of callers.
pub struct Session {
    state: Arc<watch::Sender<ConnectionState>>,
    writer: Arc<DuplexWriter>,
    consumers: Arc<ConsumerRegistry>,
    subscriptions: SubscriptionRegistry,
    caller: ServiceCaller,
    events: EventService,
    shutdown: CancellationToken,
    /// Also serializes `close`.
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Dial the hub and authenticate. Dialing and the handshake share the
    /// `handshake_timeout` deadline.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        options.validate()?;
        let settings = &options.session;
        let deadline = Instant::now() + settings.handshake_timeout;
        let url = options.url();

        debug!(%url, "dialing hub");
        let (ws, _) = tokio::time::timeout_at(deadline, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| HassError::HandshakeTimeout(settings.handshake_timeout))??;

        Self::establish(ws, &options.access_token, settings, deadline).await
    }

    /// Authenticate over an already connected transport.
    pub async fn handshake<T: Transport>(
        transport: T,
        access_token: &str,
        settings: &SessionSettings,
    ) -> Result<Self> {
        let deadline = Instant::now() + settings.handshake_timeout;
        Self::establish(transport, access_token, settings, deadline).await
    }

    async fn establish<T: Transport>(
        mut transport: T,
        access_token: &str,
        settings: &SessionSettings,
        deadline: Instant,
    ) -> Result<Self> {
        let state = Arc::new(watch::Sender::new(ConnectionState::Handshaking));

        let outcome = tokio::time::timeout_at(
            deadline,
            handshake::authenticate(&mut transport, access_token),
        )
        .await
        .map_err(|_| HassError::HandshakeTimeout(settings.handshake_timeout))
        .and_then(|authenticated| authenticated);

        if let Err(e) = outcome {
            state.send_replace(ConnectionState::Closed);
            // The connection is unusable; the peer may already be gone.
            let _ = tokio::time::timeout(CLOSE_GRACE, transport.close()).await;
            return Err(e);
        }

        info!("authenticated with hub");
        Ok(Self::start(transport, settings, state))
    }

    fn start<T: Transport>(
        transport: T,
        settings: &SessionSettings,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        let (sink, source) = transport.split();
        let sink: FrameSink = Box::pin(sink);
        let source: FrameSource = Box::pin(source);

        let writer = Arc::new(DuplexWriter::new(sink, state.clone()));
        let consumers = Arc::new(ConsumerRegistry::new(settings.consumer_capacity));
        let shutdown = CancellationToken::new();

        // Ready before the reader runs, so a dead transport still ends Closed.
        state.send_replace(ConnectionState::Ready);
        let reader = tokio::spawn(run_reader(
            source,
            consumers.clone(),
            state.clone(),
            shutdown.clone(),
        ));

        Self {
            subscriptions: SubscriptionRegistry::new(writer.clone(), consumers.clone()),
            caller: ServiceCaller::new(writer.clone(), consumers.clone(), settings.call_timeout),
            events: EventService::new(writer.clone()),
            state,
            writer,
            consumers,
            shutdown,
            reader: Mutex::new(Some(reader)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Resolves once the session reaches `Closed`, whether through
    /// [`close`](Self::close) or because the connection dropped.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == ConnectionState::Closed).await;
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(HassError::NotConnected)
        }
    }

    /// Send a service call, waiting for its response if it asked for one.
    pub async fn call(&self, call: ServiceCall) -> Result<ServiceResponse> {
        self.caller.call(call).await
    }

    pub async fn call_with_timeout(
        &self,
        call: ServiceCall,
        timeout: Option<Duration>,
    ) -> Result<ServiceResponse> {
        self.caller.call_with_timeout(call, timeout).await
    }

    /// Build and send a `call_service` command in one go.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Option<Value>,
        target: ServiceTarget,
        expects_response: bool,
    ) -> Result<ServiceResponse> {
        let mut call = ServiceCall::new(domain, service)
            .with_target(target)
            .with_response(expects_response);
        call.service_data = data;
        self.call(call).await
    }

    pub async fn fire_event(
        &self,
        event_type: &str,
        event_data: Option<Map<String, Value>>,
    ) -> Result<()> {
        self.events.fire(event_type, event_data).await.map(|_| ())
    }

    /// Subscribe to `event_type` once per connection; later calls for the
    /// same type send nothing and return `Ok(false)`.
    pub async fn subscribe(&self, event_type: &str) -> Result<bool> {
        self.subscriptions.subscribe(event_type).await
    }

    /// Stream events of `event_type` until the session closes.
    pub fn listen(&self, event_type: &str) -> Result<EventStream> {
        self.ensure_ready()?;
        self.subscriptions.listen(event_type)
    }

    /// Stream every decoded inbound envelope until the session closes.
    pub fn frames(&self) -> Result<FrameStream> {
        self.ensure_ready()?;
        self.consumers.add_tap()
    }

    pub async fn subscribed_event_types(&self) -> Vec<String> {
        self.subscriptions.subscribed_event_types().await
    }

    /// Calls currently waiting for a result frame.
    pub fn pending_calls(&self) -> usize {
        self.consumers.pending_count()
    }

    pub fn active_listeners(&self) -> usize {
        self.consumers.listener_count()
    }

    pub fn caller(&self) -> &ServiceCaller {
        &self.caller
    }

    pub fn events(&self) -> &EventService {
        &self.events
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Stop accepting commands, send a close frame, stop the read loop, and
    /// release every waiting consumer. Safe to call more than once.
    pub async fn close(&self) {
        // Held for the whole shutdown: a concurrent caller returns only after
        // the first one has finished.
        let mut reader = self.reader.lock().await;

        let mut was_ready = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Ready {
                *state = ConnectionState::Closing;
                was_ready = true;
                true
            } else {
                false
            }
        });

        if was_ready {
            match tokio::time::timeout(CLOSE_GRACE, self.writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "close frame not delivered"),
                Err(_) => debug!("timed out sending close frame"),
            }
        }

        self.shutdown.cancel();
        if let Some(reader) = reader.take() {
            let _ = reader.await;
        }
        self.consumers.close();
        self.state.send_replace(ConnectionState::Closed);
        if was_ready {
            info!("session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
