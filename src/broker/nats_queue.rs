use super::NotificationQueue;
use crate::datamodel::{Delivery, MessageHandle};
use anyhow::{Context, Result, anyhow, bail};
use async_nats::jetstream::{self, consumer::PullConsumer};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
struct InFlight<M> {
    message: M,
    received_at: Instant,
}

/// Deliveries handed out and not yet acknowledged, keyed by receipt.
struct InFlightTable<M> {
    entries: Mutex<HashMap<String, InFlight<M>>>,
    visibility_timeout: Duration,
}

impl<M> InFlightTable<M> {
    fn new(visibility_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            visibility_timeout,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, InFlight<M>>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("in-flight delivery table is poisoned"))
    }

    /// Drops receipts whose visibility window lapsed, then records new ones.
    fn record(&self, received: Vec<(String, M)>, now: Instant) -> Result<()> {
        let mut entries = self.lock()?;
        let visibility_timeout = self.visibility_timeout;
        entries.retain(|_, entry| now.duration_since(entry.received_at) < visibility_timeout);
        for (receipt, message) in received {
            entries.insert(
                receipt,
                InFlight {
                    message,
                    received_at: now,
                },
            );
        }
        Ok(())
    }

    /// Takes the delivery out while it is being acknowledged. It must be
    /// handed back with [`InFlightTable::restore`] if the ack fails.
    fn checkout(&self, handle: &MessageHandle) -> Result<InFlight<M>> {
        let entry = self.lock()?.remove(handle.receipt());
        let Some(entry) = entry else {
            bail!("Unknown message handle {}", handle);
        };
        if entry.received_at.elapsed() >= self.visibility_timeout {
            bail!("Message handle {} expired", handle);
        }
        Ok(entry)
    }

    fn restore(&self, handle: &MessageHandle, entry: InFlight<M>) -> Result<()> {
        self.lock()?.insert(handle.receipt().to_string(), entry);
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or_default()
    }
}

/// Drains one fetch. The first stream error fails the whole poll so the
/// caller's retry and error reporting see it.
async fn drain_fetch<S, T, E>(mut messages: S) -> Result<Vec<T>>
where
    S: Stream<Item = Result<T, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut received = Vec::new();
    while let Some(msg) = messages.next().await {
        match msg {
            Ok(message) => received.push(message),
            Err(e) => bail!("Error receiving message: {}", e),
        }
    }
    Ok(received)
}

/// Queue backed by a durable JetStream pull consumer with explicit acks.
///
/// The consumer's `ack_wait` is the visibility window. Handles are the ack
/// reply subjects of the deliveries; a handle older than the window is
/// forgotten since the server has already made the message visible again.
pub struct NatsQueue {
    consumer: PullConsumer,
    stream_name: String,
    consumer_name: String,
    visibility_timeout: Duration,
    in_flight: InFlightTable<jetstream::Message>,
}

impl std::fmt::Debug for NatsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsQueue")
            .field("stream_name", &self.stream_name)
            .field("consumer_name", &self.consumer_name)
            .field("visibility_timeout", &self.visibility_timeout)
            .finish_non_exhaustive()
    }
}

impl NatsQueue {
    pub async fn bind(
        context: &jetstream::Context,
        stream_name: &str,
        consumer_name: &str,
        visibility_timeout: Duration,
    ) -> Result<Self> {
        debug!(
            stream = %stream_name,
            consumer = %consumer_name,
            "binding nats queue consumer"
        );

        let config = jetstream::consumer::pull::Config {
            name: Some(consumer_name.to_string()),
            durable_name: Some(consumer_name.to_string()),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: visibility_timeout,
            ..Default::default()
        };

        let consumer = context
            .create_consumer_on_stream(config, stream_name)
            .await
            .context("failed to create consumer")?;

        Ok(Self {
            consumer,
            stream_name: stream_name.to_string(),
            consumer_name: consumer_name.to_string(),
            visibility_timeout,
            in_flight: InFlightTable::new(visibility_timeout),
        })
    }
}

#[async_trait]
impl NotificationQueue for NatsQueue {
    async fn poll(&self, wait: Duration, max_messages: usize) -> Result<Vec<Delivery>> {
        let messages = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(wait)
            .messages()
            .await
            .context("Failed to fetch messages")?;

        let received = drain_fetch(messages).await?;

        let mut deliveries = Vec::with_capacity(received.len());
        let mut receipts = Vec::with_capacity(received.len());
        for message in received {
            let Some(receipt) = message.reply.as_ref().map(|reply| reply.to_string()) else {
                warn!(subject = %message.subject, "delivery without ack subject, skipping");
                continue;
            };
            deliveries.push(Delivery::new(
                message.payload.clone(),
                MessageHandle::new(receipt.clone()),
            ));
            receipts.push((receipt, message));
        }
        self.in_flight.record(receipts, Instant::now())?;

        debug!(
            stream = %self.stream_name,
            consumer = %self.consumer_name,
            count = deliveries.len(),
            "polled queue"
        );
        Ok(deliveries)
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<()> {
        let entry = self.in_flight.checkout(handle)?;
        match entry.message.double_ack().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.in_flight.restore(handle, entry)?;
                Err(anyhow!("Failed to acknowledge message {}: {}", handle, e))
            }
        }
    }
}
