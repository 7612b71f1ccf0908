use std::fmt;
use std::time::Duration;

use crate::error::{HassError, Result};

pub const DEFAULT_PORT: u16 = 8123;
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_CONSUMER_CAPACITY: usize = 64;

/// Tunables for a session once the transport is connected.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Deadline for the greeting/credentials/verdict exchange.
    pub handshake_timeout: Duration,
    /// Default deadline for calls that expect a response (`None` = wait for
    /// the result or for the connection to close).
    pub call_timeout: Option<Duration>,
    /// Queue depth of each event listener and frame tap.
    pub consumer_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: None,
            consumer_capacity: DEFAULT_CONSUMER_CAPACITY,
        }
    }
}

/// Where and how to connect.
#[derive(Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub access_token: String,
    /// `wss://` instead of `ws://`.
    pub secure: bool,
    pub session: SessionSettings,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            access_token: access_token.into(),
            secure: false,
            session: SessionSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(HassError::InvalidArgs("host is required".to_string()));
        }
        if self.access_token.trim().is_empty() {
            return Err(HassError::InvalidArgs("access token is required".to_string()));
        }
        Ok(())
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/api/websocket", scheme, self.host, self.port)
    }
}

// Keeps the token out of logs.
impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("access_token", &"<redacted>")
            .field("secure", &self.secure)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = ConnectOptions::new("homeassistant.local", "T");
        assert_eq!(opts.port, 8123);
        assert!(!opts.secure);
        assert_eq!(opts.session.handshake_timeout, Duration::from_secs(3));
        assert!(opts.session.call_timeout.is_none());
        assert_eq!(opts.session.consumer_capacity, 64);
    }

    #[test]
    fn url_scheme_follows_secure() {
        let mut opts = ConnectOptions::new("10.0.0.5", "T");
        assert_eq!(opts.url(), "ws://10.0.0.5:8123/api/websocket");
        opts.secure = true;
        opts.port = 443;
        assert_eq!(opts.url(), "wss://10.0.0.5:443/api/websocket");
    }

    #[test]
    fn validate_requires_host_and_token() {
        assert!(ConnectOptions::new("h", "t").validate().is_ok());
        assert!(matches!(
            ConnectOptions::new("", "t").validate(),
            Err(HassError::InvalidArgs(_))
        ));
        assert!(matches!(
            ConnectOptions::new("h", "  ").validate(),
            Err(HassError::InvalidArgs(_))
        ));
    }

    #[test]
    fn debug_redacts_token() {
        let opts = ConnectOptions::new("h", "super-secret");
        let printed = format!("{opts:?}");
        assert!(!printed.contains("super-secret"));
        assert!(printed.contains("<redacted>"));
    }
}
