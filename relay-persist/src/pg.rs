use chrono::{DateTime, Utc};
use relay_events::PresenceStatus;
use sqlx::PgPool;

use crate::{RelayStore, StoreError, StoreFuture};

/// Postgres-backed relay store.
///
/// Schema ownership is external; this store expects the conventional
/// tables (`users`, `rooms`, `room_members`, `messages` with BIGINT ids)
/// and only issues the statements the persistence contract enumerates.
#[derive(Clone)]
pub struct PgRelayStore {
    pool: PgPool,
}

impl PgRelayStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn map_err(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::unavailable(err)
        }
        _ => StoreError::query(err),
    }
}

impl RelayStore for PgRelayStore {
    fn store_message<'a>(
        &'a self,
        room: &'a str,
        sender: &'a str,
        content: &'a str,
        timestamp: DateTime<Utc>,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO messages (room, sender, content, timestamp) VALUES ($1, $2, $3, $4)",
            )
            .bind(room)
            .bind(sender)
            .bind(content)
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
            Ok(())
        })
    }

    fn enter_room<'a>(&'a self, username: &'a str, room: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(map_err)?;

            let room_id: Option<i64> = sqlx::query_scalar("SELECT id FROM rooms WHERE name = $1")
                .bind(room)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_err)?;
            let room_id = match room_id {
                Some(id) => id,
                None => sqlx::query_scalar("INSERT INTO rooms (name) VALUES ($1) RETURNING id")
                    .bind(room)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(map_err)?,
            };

            let existing: Option<i32> = sqlx::query_scalar(
                "SELECT 1 FROM room_members \
                 WHERE room_id = $1 AND user_id = (SELECT id FROM users WHERE username = $2)",
            )
            .bind(room_id)
            .bind(username)
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_err)?;

            if existing.is_none() {
                sqlx::query(
                    "INSERT INTO room_members (room_id, user_id) \
                     VALUES ($1, (SELECT id FROM users WHERE username = $2))",
                )
                .bind(room_id)
                .bind(username)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;

                let members: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM room_members WHERE room_id = $1")
                        .bind(room_id)
                        .fetch_one(&mut *tx)
                        .await
                        .map_err(map_err)?;
                if members > 2 {
                    sqlx::query("UPDATE rooms SET is_group = TRUE WHERE id = $1")
                        .bind(room_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_err)?;
                }
            }

            tx.commit().await.map_err(map_err)?;
            Ok(())
        })
    }

    fn leave_room<'a>(&'a self, username: &'a str, room: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "DELETE FROM room_members \
                 WHERE room_id = (SELECT id FROM rooms WHERE name = $1) \
                 AND user_id = (SELECT id FROM users WHERE username = $2)",
            )
            .bind(room)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
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
            sqlx::query("UPDATE messages SET content = $1, edited_at = $2 WHERE id = $3")
                .bind(new_content)
                .bind(edited_at)
                .bind(message_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(())
        })
    }

    fn delete_message(&self, message_id: i64) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE messages SET deleted = TRUE WHERE id = $1")
                .bind(message_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
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
            sqlx::query("UPDATE users SET status = $1 WHERE username = $2")
                .bind(value)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .map_err(map_err)?;
            Ok(())
        })
    }
}
