use relay_limit::{CounterError, CounterFuture, CounterStore};

use crate::RedisHandle;

/// Rate-limit counters over Redis.
///
/// `INCR` is atomic server-side, so concurrent gateways share one count
/// per key without any client-side coordination.
#[derive(Clone)]
pub struct RedisCounterStore {
    handle: RedisHandle,
}

impl RedisCounterStore {
    pub fn new(handle: RedisHandle) -> Self {
        Self { handle }
    }
}

impl CounterStore for RedisCounterStore {
    fn incr<'a>(&'a self, key: &'a str) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let mut conn = self.handle.conn().lock().await;
            redis::cmd("INCR")
                .arg(key)
                .query_async::<_, u64>(&mut *conn)
                .await
                .map_err(CounterError::new)
        })
    }

    fn expire<'a>(&'a self, key: &'a str, secs: u64) -> CounterFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.handle.conn().lock().await;
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(secs)
                .query_async::<_, ()>(&mut *conn)
                .await
                .map_err(CounterError::new)
        })
    }

    fn ttl<'a>(&'a self, key: &'a str) -> CounterFuture<'a, i64> {
        Box::pin(async move {
            let mut conn = self.handle.conn().lock().await;
            let ttl = redis::cmd("TTL")
                .arg(key)
                .query_async::<_, i64>(&mut *conn)
                .await
                .map_err(CounterError::new)?;
            // -1 (no expiry) and -2 (no key) both mean "no window armed".
            Ok(ttl.max(0))
        })
    }
}
