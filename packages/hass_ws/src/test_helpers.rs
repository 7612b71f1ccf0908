//! An in-memory hub on the far side of a `tokio::io::duplex` pipe.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::DuplexStream;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::Role;

use crate::config::SessionSettings;
use crate::session::Session;

/// Timeout for each hub-side read in tests.
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) const TEST_TOKEN: &str = "test-token";

pub(crate) type ClientStream = WebSocketStream<DuplexStream>;

pub(crate) struct FakeHub {
    ws: WebSocketStream<DuplexStream>,
}

/// Client and hub ends of a fresh in-memory connection.
pub(crate) async fn duplex_pair() -> (ClientStream, FakeHub) {
    let (client, server) = tokio::io::duplex(256 * 1024);
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server, Role::Server, None).await;
    (client, FakeHub { ws: server })
}

/// A session that has completed the handshake against a [`FakeHub`].
pub(crate) async fn connected_session(settings: SessionSettings) -> (Session, FakeHub) {
    let (client, mut hub) = duplex_pair().await;
    let (session, ()) = tokio::join!(
        Session::handshake(client, TEST_TOKEN, &settings),
        hub.accept_auth(TEST_TOKEN)
    );
    (session.expect("handshake failed"), hub)
}

impl FakeHub {
    pub(crate) async fn send_json(&mut self, value: Value) {
        self.send_text(&value.to_string()).await;
    }

    pub(crate) async fn send_text(&mut self, text: &str) {
        self.ws
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("hub failed to send");
    }

    /// Next data frame from the client, parsed as JSON.
    pub(crate) async fn recv_json(&mut self) -> Value {
        loop {
            let msg = timeout(TEST_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for client frame")
                .expect("client hung up")
                .expect("hub read error");
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("client sent invalid json");
                }
                Message::Close(_) => panic!("client closed while a frame was expected"),
                _ => continue,
            }
        }
    }

    /// Next message of any kind, or `None` once the client is gone.
    pub(crate) async fn recv_message(&mut self) -> Option<Message> {
        match timeout(TEST_TIMEOUT, self.ws.next()).await {
            Ok(Some(Ok(msg))) => Some(msg),
            Ok(_) => None,
            Err(_) => panic!("timed out waiting for client message"),
        }
    }

    /// Assert the client sends nothing for `wait`.
    pub(crate) async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(Ok(msg))) = timeout(wait, self.ws.next()).await {
            panic!("expected no frame, got {msg:?}");
        }
    }

    pub(crate) async fn accept_auth(&mut self, token: &str) {
        self.send_json(json!({"type": "auth_required", "ha_version": "2024.6.0"}))
            .await;
        let auth = self.recv_json().await;
        assert_eq!(auth["type"], "auth");
        assert_eq!(auth["access_token"], token);
        self.send_json(json!({"type": "auth_ok", "ha_version": "2024.6.0"}))
            .await;
    }

    pub(crate) async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}
