//! Decoupled, at-least-once persistence for the relay.
//!
//! Gateways enqueue [`PersistenceTask`]s and never wait for them; a
//! bounded worker pool applies each task to the relational store, retrying
//! transient failures and logging permanent ones. Every task is safe to
//! apply more than once except `StoreMessage`, which may duplicate a row
//! if retried after a partial failure, an accepted at-least-once
//! semantic, not silently deduplicated.

mod error;
mod memory;
mod pg;
mod queue;
mod store;
mod task;

pub use error::StoreError;
pub use memory::{MemoryRelayStore, MessageRow};
pub use pg::PgRelayStore;
pub use queue::{PersistenceQueue, QueueConfig};
pub use store::{apply, RelayStore, StoreFuture};
pub use task::PersistenceTask;
