use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use relay_events::PresenceStatus;

use crate::{RelayStore, StoreFuture};

/// A persisted message row as the in-memory store sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub room: String,
    pub sender: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
}

#[derive(Default)]
struct RoomRow {
    is_group: bool,
    members: BTreeSet<String>,
}

#[derive(Default)]
struct Tables {
    next_message_id: i64,
    messages: Vec<MessageRow>,
    rooms: HashMap<String, RoomRow>,
    user_status: HashMap<String, String>,
}

/// In-memory relational store for tests and single-node runs.
///
/// Mirrors the Postgres store's behavior table for table, including the
/// "more than two members makes a group chat" rule and soft deletion.
#[derive(Clone, Default)]
pub struct MemoryRelayStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryRelayStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        // A poisoned lock only happens after a panic in this module.
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Inspection accessors for tests and diagnostics.

    pub fn messages(&self) -> Vec<MessageRow> {
        self.lock().messages.clone()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.lock().rooms.get(room).map_or(0, |r| r.members.len())
    }

    pub fn is_group(&self, room: &str) -> bool {
        self.lock().rooms.get(room).is_some_and(|r| r.is_group)
    }

    pub fn room_exists(&self, room: &str) -> bool {
        self.lock().rooms.contains_key(room)
    }

    pub fn user_status(&self, user_id: &str) -> Option<String> {
        self.lock().user_status.get(user_id).cloned()
    }
}

impl RelayStore for MemoryRelayStore {
    fn store_message<'a>(
        &'a self,
        room: &'a str,
        sender: &'a str,
        content: &'a str,
        timestamp: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tables = self.lock();
            tables.next_message_id += 1;
            let id = tables.next_message_id;
            tables.messages.push(MessageRow {
                id,
                room: room.to_string(),
                sender: sender.to_string(),
                content: content.to_string(),
                timestamp,
                edited_at: None,
                deleted: false,
            });
            Ok(())
        })
    }

    fn enter_room<'a>(&'a self, username: &'a str, room: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tables = self.lock();
            let row = tables.rooms.entry(room.to_string()).or_default();
            row.members.insert(username.to_string());
            if row.members.len() > 2 {
                row.is_group = true;
            }
            Ok(())
        })
    }

    fn leave_room<'a>(&'a self, username: &'a str, room: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if let Some(row) = self.lock().rooms.get_mut(room) {
                row.members.remove(username);
            }
            Ok(())
        })
    }

    fn edit_message<'a>(
        &'a self,
        message_id: i64,
        new_content: &'a str,
        edited_at: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tables = self.lock();
            if let Some(row) = tables.messages.iter_mut().find(|m| m.id == message_id) {
                row.content = new_content.to_string();
                row.edited_at = Some(edited_at);
            }
            Ok(())
        })
    }

    fn delete_message(&self, message_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut tables = self.lock();
            if let Some(row) = tables.messages.iter_mut().find(|m| m.id == message_id) {
                row.deleted = true;
            }
            Ok(())
        })
    }

    fn update_presence<'a>(
        &'a self,
        user_id: &'a str,
        status: PresenceStatus,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let value = match status {
                PresenceStatus::Online => "online".to_string(),
                PresenceStatus::Offline => "offline".to_string(),
                PresenceStatus::LastSeen => Utc::now().to_rfc3339(),
            };
            self.lock().user_status.insert(user_id.to_string(), value);
            Ok(())
        })
    }
}
