//! One-shot authentication exchange run before any other traffic.
//!
//! The hub speaks first (`auth_required`), the client answers with its
//! token, and the hub either accepts (`auth_ok`) or rejects the connection.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};

use crate::error::{HassError, Result};
use crate::protocol::{OutboundMessage, TYPE_AUTH_OK};
use crate::transport::{Transport, frame_payload};

#[derive(Deserialize, Default)]
struct AuthReply {
    #[serde(rename = "type", default)]
    msg_type: String,
    #[serde(default)]
    message: Option<String>,
}

/// Run the handshake, failing with [`HassError::HandshakeTimeout`] if the
/// whole exchange takes longer than `timeout`.
pub async fn authenticate_within<T: Transport>(
    transport: &mut T,
    access_token: &str,
    timeout: Duration,
) -> Result<()> {
    tokio::time::timeout(timeout, authenticate(transport, access_token))
        .await
        .map_err(|_| HassError::HandshakeTimeout(timeout))?
}

/// Greeting, credentials, verdict, in that order.
pub async fn authenticate<T: Transport>(transport: &mut T, access_token: &str) -> Result<()> {
    let greeting = read_frame(transport).await?;
    debug!(bytes = greeting.len(), "received hub greeting");

    let auth = OutboundMessage::Auth {
        access_token: access_token.to_string(),
    };
    let json = serde_json::to_string(&auth)?;
    transport.send(Message::Text(json.into())).await?;

    let reply = read_frame(transport).await?;
    let reply: AuthReply = serde_json::from_slice(&reply).unwrap_or_default();
    if reply.msg_type != TYPE_AUTH_OK {
        warn!(
            reply_type = %reply.msg_type,
            message = reply.message.as_deref().unwrap_or(""),
            "hub rejected the access token"
        );
        return Err(HassError::InvalidCredentials);
    }
    Ok(())
}

/// Next data frame, skipping ping/pong. A close frame or end of stream
/// before a data frame is a transport failure.
async fn read_frame<T: Transport>(transport: &mut T) -> Result<Vec<u8>> {
    loop {
        match transport.next().await {
            Some(Ok(Message::Close(_))) | None => {
                return Err(tungstenite::Error::ConnectionClosed.into());
            }
            Some(Ok(message)) => {
                if let Some(payload) = frame_payload(&message) {
                    return Ok(payload.to_vec());
                }
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{TEST_TIMEOUT, duplex_pair};
    use serde_json::json;

    #[tokio::test]
    async fn accepted_token() {
        let (mut client, mut hub) = duplex_pair().await;

        let hub_side = async {
            hub.send_json(json!({"type": "auth_required", "ha_version": "2024.6.0"}))
                .await;
            let auth = hub.recv_json().await;
            hub.send_json(json!({"type": "auth_ok", "ha_version": "2024.6.0"}))
                .await;
            auth
        };

        let (result, auth) = tokio::join!(
            authenticate_within(&mut client, "T", TEST_TIMEOUT),
            hub_side
        );
        result.unwrap();
        assert_eq!(auth, json!({"type": "auth", "access_token": "T"}));
    }

    #[tokio::test]
    async fn rejected_token() {
        let (mut client, mut hub) = duplex_pair().await;

        let hub_side = async {
            hub.send_json(json!({"type": "auth_required"})).await;
            let _ = hub.recv_json().await;
            hub.send_json(json!({"type": "auth_invalid", "message": "Invalid password"}))
                .await;
        };

        let (result, ()) = tokio::join!(authenticate(&mut client, "wrong"), hub_side);
        assert!(matches!(result, Err(HassError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn unparseable_verdict_is_rejection() {
        let (mut client, mut hub) = duplex_pair().await;

        let hub_side = async {
            hub.send_json(json!({"type": "auth_required"})).await;
            let _ = hub.recv_json().await;
            hub.send_text("this is not json").await;
        };

        let (result, ()) = tokio::join!(authenticate(&mut client, "T"), hub_side);
        assert!(matches!(result, Err(HassError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn greeting_is_not_validated() {
        let (mut client, mut hub) = duplex_pair().await;

        let hub_side = async {
            hub.send_text("hello there").await;
            let _ = hub.recv_json().await;
            hub.send_json(json!({"type": "auth_ok"})).await;
        };

        let (result, ()) = tokio::join!(authenticate(&mut client, "T"), hub_side);
        result.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_hub_times_out() {
        let (mut client, _hub) = duplex_pair().await;
        let timeout = Duration::from_secs(3);
        let result = authenticate_within(&mut client, "T", timeout).await;
        match result {
            Err(HassError::HandshakeTimeout(t)) => assert_eq!(t, timeout),
            other => panic!("expected HandshakeTimeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn hub_hangs_up_mid_handshake() {
        let (mut client, mut hub) = duplex_pair().await;

        let hub_side = async move {
            hub.send_json(json!({"type": "auth_required"})).await;
            let _ = hub.recv_json().await;
            hub.close().await;
        };

        let (result, ()) = tokio::join!(authenticate(&mut client, "T"), hub_side);
        match result {
            Err(HassError::Transport(_)) => {}
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
