//! Fan-out bus abstraction and the chat event wire model.
//!
//! Every front-end process publishes room-bound events to one of four fixed
//! channels and subscribes to all four at startup. The bus is best-effort:
//! a lost message degrades remote delivery for that one event, never
//! persisted state (persistence is enqueued independently by the
//! originating gateway).

mod local;

pub use local::LocalBus;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

// ── ConnectionId ─────────────────────────────────────────────────────────

/// Identifier of a live client socket. Unique per accepted connection and
/// never reused; a reconnecting client gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ── PresenceStatus ───────────────────────────────────────────────────────

/// Advisory user presence. Shared state is last-writer-wins; the
/// persistence worker replaces `LastSeen` with the current server time
/// when writing the users table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
    LastSeen,
}

// ── Channel ──────────────────────────────────────────────────────────────

/// The four fixed bus channels. Channels are per event category rather
/// than per room to keep the subscription count bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Chat,
    Edit,
    Delete,
    Presence,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Chat, Channel::Edit, Channel::Delete, Channel::Presence];

    /// Stable broker-side channel name.
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Chat => "channel:chat_messages",
            Channel::Edit => "channel:edit_messages",
            Channel::Delete => "channel:delete_messages",
            Channel::Presence => "channel:active_users",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── ChatEvent ────────────────────────────────────────────────────────────

/// The unit of fan-out. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageSent {
        room: String,
        sender: String,
        content: String,
        client_msg_id: String,
        timestamp: DateTime<Utc>,
    },
    MessageEdited {
        room: String,
        message_id: i64,
        new_content: String,
        edited_at: DateTime<Utc>,
    },
    MessageDeleted {
        room: String,
        message_id: i64,
    },
    TypingChanged {
        room: String,
        user: String,
        is_typing: bool,
    },
    PresenceChanged {
        user_id: String,
        status: PresenceStatus,
    },
    UserJoined {
        room: String,
        user: String,
    },
    UserLeft {
        room: String,
        user: String,
    },
}

impl ChatEvent {
    /// The channel this event is published on. Join/leave notices and
    /// typing indicators are room-scoped chat activity and ride the chat
    /// channel.
    pub fn channel(&self) -> Channel {
        match self {
            ChatEvent::MessageSent { .. }
            | ChatEvent::TypingChanged { .. }
            | ChatEvent::UserJoined { .. }
            | ChatEvent::UserLeft { .. } => Channel::Chat,
            ChatEvent::MessageEdited { .. } => Channel::Edit,
            ChatEvent::MessageDeleted { .. } => Channel::Delete,
            ChatEvent::PresenceChanged { .. } => Channel::Presence,
        }
    }

    /// Room for room-scoped variants; `None` for presence updates, which
    /// are delivered to every local connection.
    pub fn room(&self) -> Option<&str> {
        match self {
            ChatEvent::MessageSent { room, .. }
            | ChatEvent::MessageEdited { room, .. }
            | ChatEvent::MessageDeleted { room, .. }
            | ChatEvent::TypingChanged { room, .. }
            | ChatEvent::UserJoined { room, .. }
            | ChatEvent::UserLeft { room, .. } => Some(room),
            ChatEvent::PresenceChanged { .. } => None,
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────

/// What actually travels over the bus. `origin` is the connection that
/// caused the event; the publishing process uses it to suppress echo to
/// the sender's own socket while still delivering to its other local
/// members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub origin: Option<ConnectionId>,
    pub event: ChatEvent,
}

impl Envelope {
    pub fn new(origin: Option<ConnectionId>, event: ChatEvent) -> Self {
        Self { origin, event }
    }

    pub fn encode(&self) -> Result<Bytes, BusError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| BusError::Codec(Box::new(e)))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(payload).map_err(|e| BusError::Codec(Box::new(e)))
    }
}

// ── BusError ─────────────────────────────────────────────────────────────

/// Errors from bus operations.
#[derive(Debug)]
pub enum BusError {
    Publish(Box<dyn std::error::Error + Send + Sync>),
    Subscribe(Box<dyn std::error::Error + Send + Sync>),
    Codec(Box<dyn std::error::Error + Send + Sync>),
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::Publish(e) => write!(f, "bus publish: {e}"),
            BusError::Subscribe(e) => write!(f, "bus subscribe: {e}"),
            BusError::Codec(e) => write!(f, "bus codec: {e}"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BusError::Publish(e) | BusError::Subscribe(e) | BusError::Codec(e) => {
                Some(e.as_ref())
            }
        }
    }
}

// ── FanoutBus trait ──────────────────────────────────────────────────────

/// Boxed future returned by [`FanoutBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BusError>> + Send + 'a>>;

/// Stream of raw payloads delivered on a subscribed channel.
pub type PayloadStream = BoxStream<'static, Bytes>;

/// Pluggable publish/subscribe broker connecting all front-end processes.
///
/// Implement this to swap the in-process [`LocalBus`] for a shared broker
/// (e.g. the Redis backend in `relay-redis`). Delivery is per-channel FIFO
/// from a single publisher's perspective and best-effort overall.
pub trait FanoutBus: Send + Sync + 'static {
    /// Publish a payload on a channel. Fire-and-forget: delivery to any
    /// particular subscriber is not acknowledged.
    fn publish(&self, channel: Channel, payload: Bytes) -> BusFuture<'_, ()>;

    /// Open a subscription stream for a channel. The stream ends on broker
    /// failure; callers re-subscribe to recover.
    fn subscribe(&self, channel: Channel) -> BusFuture<'_, PayloadStream>;
}
