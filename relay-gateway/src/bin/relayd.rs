//! Relay front-end process.
//!
//! Wires a [`Gateway`] to either the in-process backends (no
//! configuration) or the shared Redis/Postgres backends, spawns the bus
//! listeners, and runs until interrupted.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use relay_events::{FanoutBus, LocalBus};
use relay_gateway::{Gateway, RelayConfig, AUTH_RATE_PREFIX, CHAT_RATE_PREFIX};
use relay_limit::{CounterStore, InMemoryCounterStore, RateGovernor};
use relay_persist::{MemoryRelayStore, PersistenceQueue, PgRelayStore, QueueConfig, RelayStore};
use relay_presence::{InMemoryPresenceStore, PresenceStore};
use relay_redis::RedisHandle;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RelayConfig::load("relay.yaml")?;

    let (bus, counters, presence): (
        Arc<dyn FanoutBus>,
        Arc<dyn CounterStore>,
        Arc<dyn PresenceStore>,
    ) = match &config.redis_url {
        Some(url) => {
            let handle = RedisHandle::connect(url).await?;
            tracing::info!(url = %url, "using redis backends");
            (
                Arc::new(handle.bus()),
                Arc::new(handle.counters()),
                Arc::new(handle.presence()),
            )
        }
        None => {
            tracing::info!("no redis_url configured, using in-process backends");
            (
                Arc::new(LocalBus::default()),
                Arc::new(InMemoryCounterStore::new()),
                Arc::new(InMemoryPresenceStore::new()),
            )
        }
    };

    let store: Arc<dyn RelayStore> = match &config.database_url {
        Some(url) => {
            let pool = sqlx::PgPool::connect_lazy(url)?;
            tracing::info!("using postgres store");
            Arc::new(PgRelayStore::new(pool))
        }
        None => {
            tracing::info!("no database_url configured, using in-memory store");
            Arc::new(MemoryRelayStore::new())
        }
    };

    let queue_config = QueueConfig {
        workers: config.queue_workers,
        max_attempts: config.queue_max_attempts,
        ..QueueConfig::default()
    };
    let (queue, queue_handle) = PersistenceQueue::start(store, queue_config);

    let chat_governor = RateGovernor::new(
        counters.clone(),
        CHAT_RATE_PREFIX,
        config.chat_limit,
        config.chat_window_secs,
    );
    let auth_governor = RateGovernor::new(
        counters,
        AUTH_RATE_PREFIX,
        config.auth_limit,
        config.auth_window_secs,
    );

    let gateway = Arc::new(Gateway::new(bus, presence, queue, chat_governor, auth_governor));
    let cancel = CancellationToken::new();
    let listeners = gateway.spawn_listeners(cancel.clone());
    tracing::info!("relay gateway running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    cancel.cancel();
    for listener in listeners {
        let _ = listener.await;
    }
    drop(gateway);
    // Give in-flight persistence a bounded window to finish.
    let _ = tokio::time::timeout(Duration::from_secs(5), queue_handle).await;
    Ok(())
}
