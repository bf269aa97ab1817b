//! Shared user presence map.
//!
//! Presence is advisory, not authoritative: the store is a plain key-value
//! map with last-writer-wins semantics and no versioning.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;
use relay_events::PresenceStatus;

// ── PresenceError ────────────────────────────────────────────────────────

/// Error from the shared presence store.
#[derive(Debug)]
pub struct PresenceError(Box<dyn std::error::Error + Send + Sync>);

impl PresenceError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

impl std::fmt::Display for PresenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "presence store: {}", self.0)
    }
}

impl std::error::Error for PresenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Boxed future returned by [`PresenceStore`] methods.
pub type PresenceFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, PresenceError>> + Send + 'a>>;

// ── PresenceStore ────────────────────────────────────────────────────────

/// Pluggable presence backend shared by all front-end processes.
pub trait PresenceStore: Send + Sync + 'static {
    /// Record a user's status. Last writer wins.
    fn set<'a>(&'a self, user_id: &'a str, status: PresenceStatus) -> PresenceFuture<'a, ()>;

    /// Read a user's status, if any was ever recorded.
    fn get<'a>(&'a self, user_id: &'a str) -> PresenceFuture<'a, Option<PresenceStatus>>;
}

// ── InMemoryPresenceStore ────────────────────────────────────────────────

/// Default in-memory presence store backed by `DashMap`.
#[derive(Clone, Default)]
pub struct InMemoryPresenceStore {
    statuses: Arc<DashMap<String, PresenceStatus>>,
}

impl InMemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceStore for InMemoryPresenceStore {
    fn set<'a>(&'a self, user_id: &'a str, status: PresenceStatus) -> PresenceFuture<'a, ()> {
        Box::pin(async move {
            self.statuses.insert(user_id.to_string(), status);
            Ok(())
        })
    }

    fn get<'a>(&'a self, user_id: &'a str) -> PresenceFuture<'a, Option<PresenceStatus>> {
        Box::pin(async move { Ok(self.statuses.get(user_id).map(|entry| *entry.value())) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_user_has_no_status() {
        let store = InMemoryPresenceStore::new();
        assert_eq!(store.get("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let store = InMemoryPresenceStore::new();
        store.set("u1", PresenceStatus::Online).await.unwrap();
        store.set("u1", PresenceStatus::LastSeen).await.unwrap();
        assert_eq!(
            store.get("u1").await.unwrap(),
            Some(PresenceStatus::LastSeen)
        );
    }
}
