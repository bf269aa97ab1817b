//! Redis backends for the relay's shared services.
//!
//! Three of the relay's collaborators are shared across every front-end
//! process: the fan-out bus, the rate-limit counters, and the presence
//! map. This crate backs all three with one Redis deployment:
//!
//! - [`RedisBus`]: pub/sub on the four fixed channels, with a listener
//!   task per subscription that transparently reconnects.
//! - [`RedisCounterStore`]: `INCR` / `EXPIRE` / `TTL`, atomic server-side.
//! - [`RedisPresenceStore`]: a hash of user id to status.
//!
//! Commands go over a shared multiplexed connection; each subscription
//! holds its own dedicated pub/sub connection as the protocol requires.

mod bus;
mod counter;
mod presence;

pub use bus::RedisBus;
pub use counter::RedisCounterStore;
pub use presence::RedisPresenceStore;

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use tokio::sync::Mutex;

/// Shared handle to one Redis deployment, cheap to clone.
#[derive(Clone)]
pub struct RedisHandle {
    client: redis::Client,
    conn: Arc<Mutex<MultiplexedConnection>>,
}

impl RedisHandle {
    /// Connect to Redis and open the shared command connection.
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            client,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn bus(&self) -> RedisBus {
        RedisBus::new(self.clone())
    }

    pub fn counters(&self) -> RedisCounterStore {
        RedisCounterStore::new(self.clone())
    }

    pub fn presence(&self) -> RedisPresenceStore {
        RedisPresenceStore::new(self.clone())
    }

    pub(crate) fn client(&self) -> &redis::Client {
        &self.client
    }

    pub(crate) fn conn(&self) -> &Arc<Mutex<MultiplexedConnection>> {
        &self.conn
    }
}
