use crate::broker::NotificationQueue;
use crate::datamodel::{Batch, Delivery, MessageHandle};
use crate::error::{CollectionError, DecodeError};
use crate::parsing::decode_envelope;
use crate::retry::{RetryPolicy, retry_with_backoff};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub max_batch_size: usize,
    pub poll_max_messages: usize,
    pub poll_wait: Duration,
    /// Wall-clock budget for the whole collection loop.
    pub budget: Duration,
    pub retry: RetryPolicy,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            poll_max_messages: 10,
            poll_wait: Duration::from_secs(1),
            budget: Duration::from_secs(540),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A poll came back empty.
    Drained,
    BatchFull,
    BudgetExhausted,
}

/// A delivery whose envelope could not be decoded. Its handle is kept so the
/// poison message can still be disposed of.
#[derive(Debug)]
pub struct RejectedDelivery {
    pub delivery: Delivery,
    pub error: DecodeError,
}

#[derive(Debug)]
pub struct Collection {
    pub batch: Batch,
    pub rejected: Vec<RejectedDelivery>,
    /// Handles of deliveries whose message id was already in the batch.
    pub duplicates: Vec<MessageHandle>,
    pub stop_reason: StopReason,
    pub polls: usize,
}

impl Collection {
    pub fn decode_failures(&self) -> usize {
        self.rejected.len()
    }

    pub fn rejected_handles(&self) -> impl Iterator<Item = &MessageHandle> {
        self.rejected.iter().map(|r| &r.delivery.handle)
    }
}

/// Drains the queue into a batch. Nothing is deleted here.
#[derive(Debug, Clone)]
pub struct BatchCollector {
    queue: Arc<dyn NotificationQueue>,
    settings: CollectorSettings,
}

impl BatchCollector {
    pub fn new(queue: Arc<dyn NotificationQueue>, settings: CollectorSettings) -> Self {
        Self { queue, settings }
    }

    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    pub async fn collect(&self) -> Result<Collection, CollectionError> {
        let deadline = Instant::now() + self.settings.budget;
        let max_batch_size = self.settings.max_batch_size.max(1);

        let mut batch = Batch::new();
        let mut rejected = Vec::new();
        let mut duplicates = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut polls = 0;

        let stop_reason = loop {
            if batch.len() >= max_batch_size {
                break StopReason::BatchFull;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break StopReason::BudgetExhausted;
            }

            let wait = self.settings.poll_wait.min(remaining);
            let max_messages = self
                .settings
                .poll_max_messages
                .max(1)
                .min(max_batch_size - batch.len());

            let queue = &self.queue;
            let deliveries = retry_with_backoff(&self.settings.retry, "queue.poll", || {
                queue.poll(wait, max_messages)
            })
            .await
            .map_err(|e| CollectionError::Poll {
                attempts: e.attempts,
                source: e.source,
            })?;
            polls += 1;
            debug!(polls, received = deliveries.len(), "queue polled");

            if deliveries.is_empty() {
                break StopReason::Drained;
            }

            for delivery in deliveries {
                match decode_envelope(&delivery.envelope) {
                    Ok(record) => {
                        if seen.insert(record.message_id.clone()) {
                            batch.push(record, delivery.handle);
                        } else {
                            debug!(message_id = %record.message_id, "duplicate delivery");
                            duplicates.push(delivery.handle);
                        }
                    }
                    Err(error) => {
                        warn!(handle = %delivery.handle, %error, "rejecting malformed envelope");
                        rejected.push(RejectedDelivery { delivery, error });
                    }
                }
            }
        };

        info!(
            records = batch.len(),
            rejected = rejected.len(),
            duplicates = duplicates.len(),
            polls,
            ?stop_reason,
            "collection finished"
        );

        Ok(Collection {
            batch,
            rejected,
            duplicates,
            stop_reason,
            polls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryQueue;
    use crate::test_utils::fixtures::{malformed_envelope, notification_envelope};

    fn settings() -> CollectorSettings {
        CollectorSettings {
            max_batch_size: 100,
            poll_max_messages: 2,
            poll_wait: Duration::from_millis(10),
            budget: Duration::from_secs(5),
            retry: RetryPolicy {
                attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
        }
    }

    #[tokio::test]
    async fn test_drains_queue_across_polls() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..5 {
            queue.push(notification_envelope(&format!("m-{}", i), "hello"));
        }
        let collector = BatchCollector::new(queue.clone(), settings());

        let collection = collector.collect().await.unwrap();

        assert_eq!(collection.batch.len(), 5);
        assert_eq!(collection.batch.handles().len(), 5);
        assert_eq!(collection.stop_reason, StopReason::Drained);
        // 3 polls with data, then an empty one
        assert_eq!(collection.polls, 4);
        assert_eq!(queue.in_flight(), 5);
        assert_eq!(queue.deleted_count(), 0);
    }

    #[tokio::test]
    async fn test_records_keep_delivery_order() {
        let queue = Arc::new(MemoryQueue::new());
        for id in ["a", "b", "c"] {
            queue.push(notification_envelope(id, "x"));
        }
        let collection = BatchCollector::new(queue, settings())
            .collect()
            .await
            .unwrap();

        let ids: Vec<_> = collection
            .batch
            .records()
            .iter()
            .map(|r| r.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_stops_at_max_batch_size() {
        let queue = Arc::new(MemoryQueue::new());
        for i in 0..10 {
            queue.push(notification_envelope(&format!("m-{}", i), "x"));
        }
        let mut settings = settings();
        settings.max_batch_size = 3;

        let collection = BatchCollector::new(queue.clone(), settings)
            .collect()
            .await
            .unwrap();

        assert_eq!(collection.batch.len(), 3);
        assert_eq!(collection.stop_reason, StopReason::BatchFull);
        assert_eq!(queue.visible(), 7);
    }

    #[tokio::test]
    async fn test_malformed_envelopes_are_rejected_not_fatal() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push(notification_envelope("ok", "x"));
        queue.push(malformed_envelope());

        let collection = BatchCollector::new(queue, settings())
            .collect()
            .await
            .unwrap();

        assert_eq!(collection.batch.len(), 1);
        assert_eq!(collection.decode_failures(), 1);
        assert_eq!(collection.rejected_handles().count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_message_ids_are_collapsed() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push(notification_envelope("same", "first"));
        queue.push(notification_envelope("same", "second"));

        let collection = BatchCollector::new(queue, settings())
            .collect()
            .await
            .unwrap();

        assert_eq!(collection.batch.len(), 1);
        assert_eq!(collection.duplicates.len(), 1);
        assert_eq!(
            collection.batch.records()[0].payload["Message"],
            serde_json::json!("first")
        );
    }

    #[tokio::test]
    async fn test_transient_poll_failures_are_retried() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push(notification_envelope("m-1", "x"));
        queue.fail_next_polls(2);

        let collection = BatchCollector::new(queue, settings())
            .collect()
            .await
            .unwrap();
        assert_eq!(collection.batch.len(), 1);
    }

    #[tokio::test]
    async fn test_persistent_poll_failure_is_fatal() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push(notification_envelope("m-1", "x"));
        queue.fail_all_polls();

        let err = BatchCollector::new(queue.clone(), settings())
            .collect()
            .await
            .unwrap_err();

        assert!(matches!(err, CollectionError::Poll { attempts: 3, .. }));
        assert_eq!(queue.poll_calls(), 3);
    }

    #[tokio::test]
    async fn test_zero_budget_collects_nothing() {
        let queue = Arc::new(MemoryQueue::new());
        queue.push(notification_envelope("m-1", "x"));
        let mut settings = settings();
        settings.budget = Duration::ZERO;

        let collection = BatchCollector::new(queue.clone(), settings)
            .collect()
            .await
            .unwrap();

        assert!(collection.batch.is_empty());
        assert_eq!(collection.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(queue.poll_calls(), 0);
    }
}
