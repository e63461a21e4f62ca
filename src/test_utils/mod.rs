//! Test utilities for snsdigest tests
//!
//! In-memory stand-ins for the queue, the topics and the artifact bucket,
//! with switches to inject failures, plus envelope fixtures.

pub mod fixtures;
pub mod memory_queue;
pub mod memory_store;
pub mod memory_topic;

pub use memory_queue::MemoryQueue;
pub use memory_store::{MemoryStore, StoredObject};
pub use memory_topic::{MemoryTopic, PublishedMessage};

use crate::aggregator::{Aggregator, AggregatorSettings};
use crate::broker::DigestTopic;
use std::sync::Arc;

/// An aggregator wired to fresh in-memory collaborators.
pub struct TestPipeline {
    pub queue: Arc<MemoryQueue>,
    pub store: Arc<MemoryStore>,
    pub topic: Arc<MemoryTopic>,
    pub dead_letters: Arc<MemoryTopic>,
    pub aggregator: Aggregator,
}

impl TestPipeline {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self::with_collaborators(
            settings,
            Arc::new(MemoryQueue::new()),
            Arc::new(MemoryStore::new("digests")),
            Arc::new(MemoryTopic::new("digest")),
        )
    }

    pub fn with_collaborators(
        settings: AggregatorSettings,
        queue: Arc<MemoryQueue>,
        store: Arc<MemoryStore>,
        topic: Arc<MemoryTopic>,
    ) -> Self {
        let dead_letters = Arc::new(MemoryTopic::new("dead-letter"));
        let aggregator = Aggregator::new(
            queue.clone(),
            store.clone(),
            topic.clone(),
            Some(dead_letters.clone() as Arc<dyn DigestTopic>),
            settings,
        );
        Self {
            queue,
            store,
            topic,
            dead_letters,
            aggregator,
        }
    }
}
