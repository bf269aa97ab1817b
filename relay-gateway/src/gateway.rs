use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use relay_events::{Channel, ChatEvent, ConnectionId, Envelope, FanoutBus, PresenceStatus};
use relay_limit::{Decision, RateGovernor};
use relay_persist::{PersistenceQueue, PersistenceTask};
use relay_presence::PresenceStore;

use crate::error::GatewayError;
use crate::rooms::RoomMembership;

/// Counter key prefix for chat-rate admission.
pub const CHAT_RATE_PREFIX: &str = "rate_limit:chat:";

/// Counter key prefix for auth-attempt admission.
pub const AUTH_RATE_PREFIX: &str = "rate_limit:auth:";

/// Outbound events buffered per connection before slow-consumer drops.
const OUTBOUND_BUFFER: usize = 64;

/// Delay before re-opening a bus subscription that ended or failed.
const RESUBSCRIBE_DELAY: Duration = Duration::from_millis(500);

struct ConnectionHandle {
    user_id: String,
    sender: mpsc::Sender<ChatEvent>,
}

/// One front-end process's half of the relay: it owns the local socket
/// registry and room tracker, publishes every client action to the bus,
/// and delivers bus traffic back to local sockets.
///
/// Every room-bound action follows the same side-effect order: local
/// tracker first, bus publish second, persistence enqueue last. Delivery
/// to local members (including the sender's other sockets) happens on the
/// bus dispatch path, never inline, so local and remote events share one
/// code path.
pub struct Gateway {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    rooms: RoomMembership,
    bus: Arc<dyn FanoutBus>,
    presence: Arc<dyn PresenceStore>,
    queue: PersistenceQueue,
    chat_governor: RateGovernor,
    auth_governor: RateGovernor,
}

impl Gateway {
    pub fn new(
        bus: Arc<dyn FanoutBus>,
        presence: Arc<dyn PresenceStore>,
        queue: PersistenceQueue,
        chat_governor: RateGovernor,
        auth_governor: RateGovernor,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: RoomMembership::new(),
            bus,
            presence,
            queue,
            chat_governor,
            auth_governor,
        }
    }

    // ── Connection lifecycle ─────────────────────────────────────────────

    /// Admission check for an authentication attempt, keyed by the
    /// claimed identity. The session layer calls this before verifying
    /// credentials so brute-force attempts burn the window without
    /// touching the credential store.
    pub async fn admit_auth(&self, identity: &str) -> Result<(), GatewayError> {
        match self.auth_governor.check(identity).await {
            Ok(Decision::Allowed) => Ok(()),
            Ok(Decision::Denied { retry_after_secs }) => {
                Err(GatewayError::RateLimited { retry_after_secs })
            }
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "rate governor unavailable, admitting");
                Ok(())
            }
        }
    }

    /// Register an authenticated socket and hand back its outbound stream.
    pub fn open(&self, user_id: impl Into<String>) -> (ConnectionId, mpsc::Receiver<ChatEvent>) {
        let conn = ConnectionId::new();
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.connections.insert(
            conn,
            ConnectionHandle {
                user_id: user_id.into(),
                sender: tx,
            },
        );
        tracing::debug!(connection = %conn, "connection opened");
        (conn, rx)
    }

    /// Tear down a socket: deregister it, leave every room it occupied,
    /// publish the leave notices and enqueue the membership removals.
    /// Calling this twice for the same connection is a no-op.
    pub async fn disconnect(&self, conn: ConnectionId) {
        let Some((_, handle)) = self.connections.remove(&conn) else {
            return;
        };
        let user = handle.user_id;
        for room in self.rooms.remove_connection(conn) {
            self.publish(
                Some(conn),
                ChatEvent::UserLeft {
                    room: room.clone(),
                    user: user.clone(),
                },
            )
            .await;
            self.queue.enqueue(PersistenceTask::LeaveRoom {
                username: user.clone(),
                room,
            });
        }
        tracing::debug!(connection = %conn, user = %user, "connection closed");
    }

    // ── Client actions ───────────────────────────────────────────────────

    pub async fn join_room(&self, conn: ConnectionId, room: &str) -> Result<(), GatewayError> {
        let user = self.user_of(conn)?;
        non_blank(room, "room")?;
        self.rooms.join(room, conn);
        self.publish(
            Some(conn),
            ChatEvent::UserJoined {
                room: room.to_string(),
                user: user.clone(),
            },
        )
        .await;
        self.queue.enqueue(PersistenceTask::EnterRoom {
            username: user,
            room: room.to_string(),
        });
        Ok(())
    }

    /// Leaving a room the connection never joined is a no-op, not an
    /// error.
    pub async fn leave_room(&self, conn: ConnectionId, room: &str) -> Result<(), GatewayError> {
        let user = self.user_of(conn)?;
        if !self.rooms.leave(room, conn) {
            return Ok(());
        }
        self.publish(
            Some(conn),
            ChatEvent::UserLeft {
                room: room.to_string(),
                user: user.clone(),
            },
        )
        .await;
        self.queue.enqueue(PersistenceTask::LeaveRoom {
            username: user,
            room: room.to_string(),
        });
        Ok(())
    }

    pub async fn send_message(
        &self,
        conn: ConnectionId,
        room: &str,
        content: &str,
        client_msg_id: &str,
    ) -> Result<(), GatewayError> {
        let user = self.user_of(conn)?;
        non_blank(room, "room")?;
        non_blank(content, "content")?;
        self.ensure_member(conn, room)?;
        self.admit(&user).await?;

        let timestamp = Utc::now();
        self.publish(
            Some(conn),
            ChatEvent::MessageSent {
                room: room.to_string(),
                sender: user.clone(),
                content: content.to_string(),
                client_msg_id: client_msg_id.to_string(),
                timestamp,
            },
        )
        .await;
        self.queue.enqueue(PersistenceTask::StoreMessage {
            room: room.to_string(),
            sender: user,
            content: content.to_string(),
            timestamp,
        });
        Ok(())
    }

    pub async fn edit_message(
        &self,
        conn: ConnectionId,
        room: &str,
        message_id: i64,
        new_content: &str,
    ) -> Result<(), GatewayError> {
        self.user_of(conn)?;
        non_blank(new_content, "content")?;
        self.ensure_member(conn, room)?;

        let edited_at = Utc::now();
        self.publish(
            Some(conn),
            ChatEvent::MessageEdited {
                room: room.to_string(),
                message_id,
                new_content: new_content.to_string(),
                edited_at,
            },
        )
        .await;
        self.queue.enqueue(PersistenceTask::EditMessage {
            message_id,
            new_content: new_content.to_string(),
            edited_at,
        });
        Ok(())
    }

    pub async fn delete_message(
        &self,
        conn: ConnectionId,
        room: &str,
        message_id: i64,
    ) -> Result<(), GatewayError> {
        self.user_of(conn)?;
        self.ensure_member(conn, room)?;

        self.publish(
            Some(conn),
            ChatEvent::MessageDeleted {
                room: room.to_string(),
                message_id,
            },
        )
        .await;
        self.queue
            .enqueue(PersistenceTask::DeleteMessage { message_id });
        Ok(())
    }

    /// Typing indicators are ephemeral: published for fan-out, never
    /// persisted.
    pub async fn typing(
        &self,
        conn: ConnectionId,
        room: &str,
        is_typing: bool,
    ) -> Result<(), GatewayError> {
        let user = self.user_of(conn)?;
        self.ensure_member(conn, room)?;
        self.publish(
            Some(conn),
            ChatEvent::TypingChanged {
                room: room.to_string(),
                user,
                is_typing,
            },
        )
        .await;
        Ok(())
    }

    /// Write the shared presence map, then notify every connection in
    /// every process, including the originator's own socket, so clients
    /// see their status change confirmed.
    pub async fn update_presence(
        &self,
        conn: ConnectionId,
        status: PresenceStatus,
    ) -> Result<(), GatewayError> {
        let user = self.user_of(conn)?;
        if let Err(err) = self.presence.set(&user, status).await {
            tracing::warn!(user = %user, error = %err, "presence store write failed");
        }
        self.publish(
            None,
            ChatEvent::PresenceChanged {
                user_id: user.clone(),
                status,
            },
        )
        .await;
        self.queue.enqueue(PersistenceTask::UpdatePresence {
            user_id: user,
            status,
        });
        Ok(())
    }

    // ── Bus dispatch ─────────────────────────────────────────────────────

    /// Spawn one listener task per bus channel. Listeners run until the
    /// token is cancelled, re-subscribing whenever a stream ends.
    pub fn spawn_listeners(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        Channel::ALL
            .iter()
            .map(|&channel| {
                let gateway = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { gateway.run_listener(channel, cancel).await })
            })
            .collect()
    }

    async fn run_listener(&self, channel: Channel, cancel: CancellationToken) {
        loop {
            let mut stream = match self.bus.subscribe(channel).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(channel = channel.name(), error = %err, "subscribe failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => continue,
                    }
                }
            };
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    payload = stream.next() => match payload {
                        Some(payload) => match Envelope::decode(&payload) {
                            Ok(envelope) => self.dispatch(envelope),
                            Err(err) => {
                                tracing::warn!(
                                    channel = channel.name(),
                                    error = %err,
                                    "undecodable envelope dropped"
                                );
                            }
                        },
                        None => {
                            tracing::warn!(channel = channel.name(), "subscription ended, re-subscribing");
                            break;
                        }
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    /// Deliver one bus envelope to local sockets. The origin connection is
    /// skipped so a sender never hears its own event echoed back; its
    /// other sockets still receive it. Room events with no local members
    /// are dropped silently; that is the common case in a multi-process
    /// deployment.
    fn dispatch(&self, envelope: Envelope) {
        let Envelope { origin, event } = envelope;
        match event.room() {
            Some(room) => {
                for conn in self.rooms.members(room) {
                    if Some(conn) == origin {
                        continue;
                    }
                    self.deliver(conn, event.clone());
                }
            }
            None => {
                for entry in self.connections.iter() {
                    let conn = *entry.key();
                    if Some(conn) == origin {
                        continue;
                    }
                    if entry.value().sender.try_send(event.clone()).is_err() {
                        tracing::debug!(connection = %conn, "outbound buffer full, event dropped");
                    }
                }
            }
        }
    }

    fn deliver(&self, conn: ConnectionId, event: ChatEvent) {
        if let Some(handle) = self.connections.get(&conn) {
            if handle.sender.try_send(event).is_err() {
                tracing::debug!(connection = %conn, "outbound buffer full, event dropped");
            }
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn user_of(&self, conn: ConnectionId) -> Result<String, GatewayError> {
        self.connections
            .get(&conn)
            .map(|handle| handle.user_id.clone())
            .ok_or_else(|| GatewayError::Validation("unknown connection".into()))
    }

    fn ensure_member(&self, conn: ConnectionId, room: &str) -> Result<(), GatewayError> {
        if self.rooms.contains(room, conn) {
            Ok(())
        } else {
            Err(GatewayError::Validation(format!("not a member of {room}")))
        }
    }

    /// Rate-check the identity. A counter store failure admits the action
    /// with a warning rather than blocking chat on limiter availability.
    async fn admit(&self, identity: &str) -> Result<(), GatewayError> {
        match self.chat_governor.check(identity).await {
            Ok(Decision::Allowed) => Ok(()),
            Ok(Decision::Denied { retry_after_secs }) => {
                Err(GatewayError::RateLimited { retry_after_secs })
            }
            Err(err) => {
                tracing::warn!(identity = %identity, error = %err, "rate governor unavailable, admitting");
                Ok(())
            }
        }
    }

    /// Publish an envelope, logging (not propagating) bus failures: a
    /// lost publish degrades remote delivery for one event, nothing more.
    async fn publish(&self, origin: Option<ConnectionId>, event: ChatEvent) {
        let channel = event.channel();
        match Envelope::new(origin, event).encode() {
            Ok(payload) => {
                if let Err(err) = self.bus.publish(channel, payload).await {
                    tracing::warn!(channel = channel.name(), error = %err, "bus publish failed");
                }
            }
            Err(err) => {
                tracing::error!(channel = channel.name(), error = %err, "envelope encode failed");
            }
        }
    }
}

fn non_blank(value: &str, field: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        Err(GatewayError::Validation(format!("{field} must not be blank")))
    } else {
        Ok(())
    }
}
