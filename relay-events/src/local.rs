use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{BusError, BusFuture, Channel, FanoutBus, PayloadStream};

/// Default per-channel broadcast capacity.
const DEFAULT_CAPACITY: usize = 128;

/// In-process fan-out bus backed by one broadcast channel per bus channel.
///
/// Every subscriber on a channel receives every payload published after it
/// subscribed, including payloads published by the same process. A lagged
/// subscriber skips ahead and loses the overwritten payloads, the same
/// best-effort degradation a shared broker exhibits under loss.
///
/// `LocalBus` is `Clone`; clones share channel state, so handing one bus
/// to several gateways models several processes on one broker.
#[derive(Clone)]
pub struct LocalBus {
    channels: Arc<DashMap<Channel, broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl LocalBus {
    /// Create a bus with the given per-channel buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity,
        }
    }

    fn sender(&self, channel: Channel) -> broadcast::Sender<Bytes> {
        self.channels
            .entry(channel)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FanoutBus for LocalBus {
    fn publish(&self, channel: Channel, payload: Bytes) -> BusFuture<'_, ()> {
        let tx = self.sender(channel);
        Box::pin(async move {
            // No receivers means no process cares about this channel yet.
            let _ = tx.send(payload);
            Ok(())
        })
    }

    fn subscribe(&self, channel: Channel) -> BusFuture<'_, PayloadStream> {
        let rx = self.sender(channel).subscribe();
        Box::pin(async move {
            let stream = BroadcastStream::new(rx)
                .filter_map(|item| async move { item.ok() })
                .boxed();
            Ok::<PayloadStream, BusError>(stream)
        })
    }
}
