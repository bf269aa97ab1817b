//! Connection gateway: the per-process front end of the relay.
//!
//! A gateway owns the local socket registry and room tracker, admits
//! client actions through the rate governor, publishes them to the
//! fan-out bus, hands durable effects to the persistence queue, and
//! delivers bus traffic back to local sockets with sender-echo
//! suppression.

mod config;
mod error;
mod gateway;
mod rooms;

pub use config::{ConfigError, RelayConfig};
pub use error::GatewayError;
pub use gateway::{Gateway, AUTH_RATE_PREFIX, CHAT_RATE_PREFIX};
pub use rooms::RoomMembership;
