use relay_events::PresenceStatus;
use relay_presence::{PresenceError, PresenceFuture, PresenceStore};

use crate::RedisHandle;

/// Hash key holding user id → status for all processes.
const PRESENCE_KEY: &str = "channel:active_users";

/// Shared presence map over a Redis hash. Last writer wins.
#[derive(Clone)]
pub struct RedisPresenceStore {
    handle: RedisHandle,
}

impl RedisPresenceStore {
    pub fn new(handle: RedisHandle) -> Self {
        Self { handle }
    }
}

impl PresenceStore for RedisPresenceStore {
    fn set<'a>(&'a self, user_id: &'a str, status: PresenceStatus) -> PresenceFuture<'a, ()> {
        Box::pin(async move {
            let value = serde_json::to_string(&status).map_err(PresenceError::new)?;
            let mut conn = self.handle.conn().lock().await;
            redis::cmd("HSET")
                .arg(PRESENCE_KEY)
                .arg(user_id)
                .arg(value)
                .query_async::<_, ()>(&mut *conn)
                .await
                .map_err(PresenceError::new)
        })
    }

    fn get<'a>(&'a self, user_id: &'a str) -> PresenceFuture<'a, Option<PresenceStatus>> {
        Box::pin(async move {
            let mut conn = self.handle.conn().lock().await;
            let value: Option<String> = redis::cmd("HGET")
                .arg(PRESENCE_KEY)
                .arg(user_id)
                .query_async::<_, Option<String>>(&mut *conn)
                .await
                .map_err(PresenceError::new)?;
            match value {
                Some(json) => serde_json::from_str(&json)
                    .map(Some)
                    .map_err(PresenceError::new),
                None => Ok(None),
            }
        })
    }
}
