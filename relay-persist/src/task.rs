use chrono::{DateTime, Utc};
use relay_events::PresenceStatus;
use serde::{Deserialize, Serialize};

/// A durable work item carrying the minimal arguments for one relational
/// mutation. Enqueued by a gateway, executed by the worker pool; its
/// completion is never awaited by the real-time path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PersistenceTask {
    StoreMessage {
        room: String,
        sender: String,
        content: String,
        timestamp: DateTime<Utc>,
    },
    EnterRoom {
        username: String,
        room: String,
    },
    LeaveRoom {
        username: String,
        room: String,
    },
    EditMessage {
        message_id: i64,
        new_content: String,
        edited_at: DateTime<Utc>,
    },
    DeleteMessage {
        message_id: i64,
    },
    UpdatePresence {
        user_id: String,
        status: PresenceStatus,
    },
}

impl PersistenceTask {
    /// Stable task-kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PersistenceTask::StoreMessage { .. } => "store_message",
            PersistenceTask::EnterRoom { .. } => "enter_room",
            PersistenceTask::LeaveRoom { .. } => "leave_room",
            PersistenceTask::EditMessage { .. } => "edit_message",
            PersistenceTask::DeleteMessage { .. } => "delete_message",
            PersistenceTask::UpdatePresence { .. } => "update_presence",
        }
    }
}
