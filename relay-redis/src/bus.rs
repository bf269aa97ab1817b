use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use relay_events::{BusError, BusFuture, Channel, FanoutBus, PayloadStream};

use crate::RedisHandle;

/// Delay before re-opening a failed pub/sub connection.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Buffered payloads per subscription before backpressure applies.
const SUBSCRIPTION_BUFFER: usize = 256;

/// Fan-out bus over Redis pub/sub.
///
/// `publish` issues a `PUBLISH` on the shared command connection. Each
/// `subscribe` spawns a long-lived listener task with a dedicated pub/sub
/// connection; on transient failure the task re-connects and re-subscribes
/// after a short delay, so the returned stream only ends when dropped.
/// Messages published while the connection is down are lost; the bus is
/// best-effort by contract.
#[derive(Clone)]
pub struct RedisBus {
    handle: RedisHandle,
}

impl RedisBus {
    pub fn new(handle: RedisHandle) -> Self {
        Self { handle }
    }
}

impl FanoutBus for RedisBus {
    fn publish(&self, channel: Channel, payload: Bytes) -> BusFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.handle.conn().lock().await;
            redis::cmd("PUBLISH")
                .arg(channel.name())
                .arg(payload.as_ref())
                .query_async::<_, ()>(&mut *conn)
                .await
                .map_err(|e| BusError::Publish(Box::new(e)))
        })
    }

    fn subscribe(&self, channel: Channel) -> BusFuture<'_, PayloadStream> {
        let client = self.handle.client().clone();
        Box::pin(async move {
            let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
            tokio::spawn(listen(client, channel, tx));
            Ok::<PayloadStream, BusError>(ReceiverStream::new(rx).boxed())
        })
    }
}

/// Listener loop for one channel subscription. Runs until the consuming
/// stream is dropped.
async fn listen(client: redis::Client, channel: Channel, tx: mpsc::Sender<Bytes>) {
    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.subscribe(channel.name()).await {
                Ok(()) => {
                    let mut messages = pubsub.on_message();
                    while let Some(msg) = messages.next().await {
                        match msg.get_payload::<Vec<u8>>() {
                            Ok(payload) => {
                                if tx.send(Bytes::from(payload)).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(
                                    channel = channel.name(),
                                    error = %err,
                                    "undecodable pub/sub payload dropped"
                                );
                            }
                        }
                    }
                    tracing::warn!(channel = channel.name(), "pub/sub stream ended, reconnecting");
                }
                Err(err) => {
                    tracing::warn!(
                        channel = channel.name(),
                        error = %err,
                        "pub/sub subscribe failed, retrying"
                    );
                }
            },
            Err(err) => {
                tracing::warn!(
                    channel = channel.name(),
                    error = %err,
                    "pub/sub connect failed, retrying"
                );
            }
        }
        if tx.is_closed() {
            return;
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}
