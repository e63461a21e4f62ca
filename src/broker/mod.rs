use crate::datamodel::{Delivery, MessageHandle};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

pub mod client;
pub mod nats_queue;
pub mod nats_topic;

pub use client::NatsBroker;
pub use nats_queue::NatsQueue;
pub use nats_topic::NatsTopic;

/// Inbound queue carrying forwarded notifications.
///
/// Polled deliveries stay hidden from other consumers for the queue's
/// visibility window and come back unless deleted through their handle.
#[async_trait]
pub trait NotificationQueue: Send + Sync + Debug {
    /// Wait up to `wait` for at most `max_messages` deliveries.
    async fn poll(&self, wait: Duration, max_messages: usize) -> Result<Vec<Delivery>>;

    /// Remove one delivery for good.
    async fn delete(&self, handle: &MessageHandle) -> Result<()>;
}

/// Outbound topic. A call returns only once the broker accepted the message.
#[async_trait]
pub trait DigestTopic: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn publish(&self, payload: Bytes, attributes: &BTreeMap<String, String>) -> Result<()>;
}
