//! Error taxonomy for the session core.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Errors surfaced by a [`Session`](crate::Session) and its services.
#[derive(Debug, thiserror::Error)]
pub enum HassError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("invalid authentication token")]
    InvalidCredentials,

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("session is not connected")]
    NotConnected,

    #[error("call {id} did not receive a result within {timeout:?}")]
    CallTimeout { id: i64, timeout: Duration },

    #[error("connection closed before call {id} received a result")]
    ResponseChannelClosed { id: i64 },

    #[error("call {id} is already waiting for a result")]
    DuplicateCallId { id: i64 },

    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    #[error("failed to encode outbound message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("call {id} failed: {code}: {message}")]
    CallFailed {
        id: i64,
        code: String,
        message: String,
    },
}

impl HassError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidArgs(_) => "invalid_args",
            Self::InvalidCredentials => "invalid_credentials",
            Self::HandshakeTimeout(_) => "handshake_timeout",
            Self::Transport(_) => "transport_error",
            Self::NotConnected => "not_connected",
            Self::CallTimeout { .. } => "call_timeout",
            Self::ResponseChannelClosed { .. } => "response_channel_closed",
            Self::DuplicateCallId { .. } => "duplicate_call_id",
            Self::MalformedFrame(_) => "malformed_frame",
            Self::Encode(_) => "encode_error",
            Self::CallFailed { .. } => "call_failed",
        }
    }

    /// Whether the session this error came from can no longer be used.
    ///
    /// Per-call failures only concern the caller that observed them; the
    /// connection and every other in-flight call are unaffected.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials | Self::HandshakeTimeout(_) | Self::Transport(_)
        )
    }
}

pub type Result<T, E = HassError> = std::result::Result<T, E>;
