//! Fixed-window request-rate governor.
//!
//! Counters live in a shared store keyed by `prefix:identity`, so every
//! front-end process sees the same counts. The window is fixed, not
//! rolling: a burst straddling a window boundary can admit up to twice the
//! limit across the boundary. That approximation is accepted and tested,
//! not a bug.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

// ── CounterError ─────────────────────────────────────────────────────────

/// Error from the shared counter store.
#[derive(Debug)]
pub struct CounterError(Box<dyn std::error::Error + Send + Sync>);

impl CounterError {
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(err))
    }
}

impl std::fmt::Display for CounterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "counter store: {}", self.0)
    }
}

impl std::error::Error for CounterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

/// Boxed future returned by [`CounterStore`] methods.
pub type CounterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CounterError>> + Send + 'a>>;

// ── CounterStore ─────────────────────────────────────────────────────────

/// Pluggable counter backend with atomic increment-with-expiry semantics.
///
/// The store itself provides atomicity (a Redis `INCR` is a single
/// round-trip), so callers never need an optimistic retry loop.
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically increment the counter and return the post-increment value.
    fn incr<'a>(&'a self, key: &'a str) -> CounterFuture<'a, u64>;

    /// Set the counter's time-to-live. Applied by the caller only on the
    /// first increment of a window.
    fn expire<'a>(&'a self, key: &'a str, secs: u64) -> CounterFuture<'a, ()>;

    /// Remaining time-to-live in seconds, or 0 if the key has none.
    fn ttl<'a>(&'a self, key: &'a str) -> CounterFuture<'a, i64>;
}

// ── InMemoryCounterStore ─────────────────────────────────────────────────

struct Counter {
    count: u64,
    deadline: Option<Instant>,
}

/// Default in-memory counter store backed by `DashMap`.
///
/// Expired counters are lazily evicted on access. Suitable for tests and
/// single-process deployments; multi-process deployments use a shared
/// backend (e.g. `relay-redis`).
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    counters: Arc<DashMap<String, Counter>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for InMemoryCounterStore {
    fn incr<'a>(&'a self, key: &'a str) -> CounterFuture<'a, u64> {
        Box::pin(async move {
            let mut entry = self
                .counters
                .entry(key.to_string())
                .or_insert_with(|| Counter { count: 0, deadline: None });
            let counter = entry.value_mut();
            if matches!(counter.deadline, Some(d) if d <= Instant::now()) {
                counter.count = 0;
                counter.deadline = None;
            }
            counter.count += 1;
            Ok(counter.count)
        })
    }

    fn expire<'a>(&'a self, key: &'a str, secs: u64) -> CounterFuture<'a, ()> {
        Box::pin(async move {
            if let Some(mut entry) = self.counters.get_mut(key) {
                entry.value_mut().deadline = Some(Instant::now() + Duration::from_secs(secs));
            }
            Ok(())
        })
    }

    fn ttl<'a>(&'a self, key: &'a str) -> CounterFuture<'a, i64> {
        Box::pin(async move {
            let remaining = self
                .counters
                .get(key)
                .and_then(|entry| entry.value().deadline)
                .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_secs() as i64)
                .unwrap_or(0);
            Ok(remaining)
        })
    }
}

// ── RateGovernor ─────────────────────────────────────────────────────────

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Over the limit for the current window; retry after the counter's
    /// remaining time-to-live.
    Denied { retry_after_secs: u64 },
}

/// Fixed-window admission check keyed by `prefix:identity`.
///
/// Each governed action class (auth, chat) gets its own governor with its
/// own prefix, limit, and window over the same shared store.
#[derive(Clone)]
pub struct RateGovernor {
    store: Arc<dyn CounterStore>,
    prefix: String,
    limit: u64,
    window_secs: u64,
}

impl RateGovernor {
    pub fn new(
        store: Arc<dyn CounterStore>,
        prefix: impl Into<String>,
        limit: u64,
        window_secs: u64,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            limit,
            window_secs,
        }
    }

    /// Increment the identity's counter and decide admission.
    ///
    /// The first increment of a window arms the expiry; counts above the
    /// limit are denied with the window's remaining seconds.
    pub async fn check(&self, identity: &str) -> Result<Decision, CounterError> {
        let key = format!("{}{}", self.prefix, identity);
        let count = self.store.incr(&key).await?;
        if count == 1 {
            self.store.expire(&key, self.window_secs).await?;
        }
        if count > self.limit {
            let ttl = self.store.ttl(&key).await?;
            return Ok(Decision::Denied {
                retry_after_secs: ttl.max(1) as u64,
            });
        }
        Ok(Decision::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_incr_is_monotonic_per_key() {
        let store = InMemoryCounterStore::new();
        assert_eq!(store.incr("a").await.unwrap(), 1);
        assert_eq!(store.incr("a").await.unwrap(), 2);
        assert_eq!(store.incr("b").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ttl_without_expiry_is_zero() {
        let store = InMemoryCounterStore::new();
        store.incr("a").await.unwrap();
        assert_eq!(store.ttl("a").await.unwrap(), 0);
    }
}
