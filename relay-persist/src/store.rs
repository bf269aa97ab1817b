use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use relay_events::PresenceStatus;

use crate::{PersistenceTask, StoreError};

/// Boxed future returned by [`RelayStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// The six relational effects the persistence layer can apply.
///
/// Implementations must keep every effect safe to apply more than once;
/// only `store_message` is allowed to duplicate under retry.
pub trait RelayStore: Send + Sync + 'static {
    /// Insert a message row.
    fn store_message<'a>(
        &'a self,
        room: &'a str,
        sender: &'a str,
        content: &'a str,
        timestamp: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;

    /// Create the room if absent, add the membership if absent, and mark
    /// the room a group chat once it holds more than two members.
    fn enter_room<'a>(&'a self, username: &'a str, room: &'a str) -> StoreFuture<'a, ()>;

    /// Delete the membership row if present.
    fn leave_room<'a>(&'a self, username: &'a str, room: &'a str) -> StoreFuture<'a, ()>;

    /// Update a message's content and edited timestamp.
    fn edit_message<'a>(
        &'a self,
        message_id: i64,
        new_content: &'a str,
        edited_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()>;

    /// Soft-delete a message; the content is retained.
    fn delete_message(&self, message_id: i64) -> StoreFuture<'_, ()>;

    /// Set the user's status column. `LastSeen` stores the current server
    /// time rather than the literal token.
    fn update_presence<'a>(
        &'a self,
        user_id: &'a str,
        status: PresenceStatus,
    ) -> StoreFuture<'a, ()>;
}

/// Apply one task to a store.
pub async fn apply(store: &dyn RelayStore, task: &PersistenceTask) -> Result<(), StoreError> {
    match task {
        PersistenceTask::StoreMessage {
            room,
            sender,
            content,
            timestamp,
        } => store.store_message(room, sender, content, *timestamp).await,
        PersistenceTask::EnterRoom { username, room } => store.enter_room(username, room).await,
        PersistenceTask::LeaveRoom { username, room } => store.leave_room(username, room).await,
        PersistenceTask::EditMessage {
            message_id,
            new_content,
            edited_at,
        } => store.edit_message(*message_id, new_content, *edited_at).await,
        PersistenceTask::DeleteMessage { message_id } => store.delete_message(*message_id).await,
        PersistenceTask::UpdatePresence { user_id, status } => {
            store.update_presence(user_id, *status).await
        }
    }
}
