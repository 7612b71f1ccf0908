//! hass_ws - session core for the Home Assistant realtime WebSocket API
//!
//! One connection carries everything: a one-time handshake, correlated
//! commands (service calls answered by a `result` frame with the same id),
//! fire-and-forget commands, and long-lived event subscriptions. A single
//! background task reads the connection and fans frames out to whoever is
//! waiting; writers share the connection through a lock.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use hass_ws::{ConnectOptions, ServiceCall, ServiceTarget, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), hass_ws::HassError> {
//!     let options = ConnectOptions::new("homeassistant.local", "long-lived-token");
//!     let session = Session::connect(&options).await?;
//!
//!     let call = ServiceCall::new("light", "turn_on")
//!         .with_target(ServiceTarget::entity("light.kitchen"));
//!     session.call(call).await?;
//!
//!     session.subscribe("state_changed").await?;
//!     let mut events = session.listen("state_changed")?;
//!     while let Some(event) = events.next().await {
//!         println!("{}", String::from_utf8_lossy(&event.raw));
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
mod demux;
pub mod error;
pub mod handshake;
mod id;
pub mod protocol;
pub mod services;
mod session;
mod subscription;
pub mod transport;
mod writer;

#[cfg(test)]
mod test_helpers;

pub use config::{ConnectOptions, SessionSettings};
pub use demux::{EventStream, FrameStream};
pub use error::{HassError, Result};
pub use id::next_id;
pub use protocol::{Envelope, EventData, OutboundMessage, ServiceCall, ServiceResponse, ServiceTarget};
pub use services::{EventService, ServiceCaller};
pub use session::{ConnectionState, Session};
pub use subscription::SubscriptionRegistry;
pub use transport::Transport;
pub use writer::DuplexWriter;
