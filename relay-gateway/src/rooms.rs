use std::collections::HashSet;

use dashmap::DashMap;
use relay_events::ConnectionId;

/// Per-process registry of which local sockets occupy which room.
///
/// Both directions are indexed: room → members drives fan-in delivery,
/// connection → rooms drives disconnect cleanup. Membership here is about
/// live sockets only; durable membership lives in the relational store.
#[derive(Default)]
pub struct RoomMembership {
    by_room: DashMap<String, HashSet<ConnectionId>>,
    by_connection: DashMap<ConnectionId, HashSet<String>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in a room. Returns `false` if it was already
    /// a member.
    pub fn join(&self, room: &str, conn: ConnectionId) -> bool {
        let added = self
            .by_room
            .entry(room.to_string())
            .or_default()
            .insert(conn);
        if added {
            self.by_connection
                .entry(conn)
                .or_default()
                .insert(room.to_string());
        }
        added
    }

    /// Remove a connection from a room. Returns `false` if it was not a
    /// member. Empty room entries are dropped.
    pub fn leave(&self, room: &str, conn: ConnectionId) -> bool {
        let removed = self
            .by_room
            .get_mut(room)
            .map_or(false, |mut members| members.remove(&conn));
        if removed {
            if let Some(mut rooms) = self.by_connection.get_mut(&conn) {
                rooms.remove(room);
            }
            self.by_room.remove_if(room, |_, members| members.is_empty());
        }
        removed
    }

    pub fn contains(&self, room: &str, conn: ConnectionId) -> bool {
        self.by_room
            .get(room)
            .map_or(false, |members| members.contains(&conn))
    }

    /// Snapshot of the room's local members. Empty for unknown rooms.
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.by_room
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop a connection from every room it occupies and return those
    /// rooms, for the disconnect path to publish leave notices.
    pub fn remove_connection(&self, conn: ConnectionId) -> Vec<String> {
        let rooms: Vec<String> = self
            .by_connection
            .remove(&conn)
            .map(|(_, rooms)| rooms.into_iter().collect())
            .unwrap_or_default();
        for room in &rooms {
            if let Some(mut members) = self.by_room.get_mut(room) {
                members.remove(&conn);
            }
            self.by_room.remove_if(room, |_, members| members.is_empty());
        }
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_is_idempotent() {
        let rooms = RoomMembership::new();
        let conn = ConnectionId::new();
        assert!(rooms.join("lobby", conn));
        assert!(!rooms.join("lobby", conn));
        assert_eq!(rooms.members("lobby"), vec![conn]);
    }

    #[test]
    fn leave_unknown_room_is_false() {
        let rooms = RoomMembership::new();
        assert!(!rooms.leave("lobby", ConnectionId::new()));
    }

    #[test]
    fn remove_connection_clears_every_room() {
        let rooms = RoomMembership::new();
        let conn = ConnectionId::new();
        let other = ConnectionId::new();
        rooms.join("a", conn);
        rooms.join("b", conn);
        rooms.join("b", other);

        let mut left = rooms.remove_connection(conn);
        left.sort();
        assert_eq!(left, vec!["a".to_string(), "b".to_string()]);
        assert!(!rooms.contains("a", conn));
        assert_eq!(rooms.members("b"), vec![other]);
        // "a" is empty and evicted entirely.
        assert!(rooms.members("a").is_empty());
    }
}
