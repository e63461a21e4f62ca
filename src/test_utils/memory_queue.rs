use crate::broker::NotificationQueue;
use crate::datamodel::{Delivery, MessageHandle};
use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredMessage {
    id: u64,
    envelope: Bytes,
}

#[derive(Debug, Default)]
struct QueueState {
    available: VecDeque<StoredMessage>,
    in_flight: HashMap<String, StoredMessage>,
    deleted: Vec<u64>,
    next_id: u64,
    next_receipt: u64,
    failing_polls: u32,
    always_fail_polls: bool,
    failing_deletes: bool,
    poll_calls: usize,
}

/// Queue with visibility semantics: polled messages move in flight until
/// deleted or released.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_envelopes<I, E>(envelopes: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<Bytes>,
    {
        let queue = Self::new();
        for envelope in envelopes {
            queue.push(envelope);
        }
        queue
    }

    pub fn push(&self, envelope: impl Into<Bytes>) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.available.push_back(StoredMessage {
            id,
            envelope: envelope.into(),
        });
        id
    }

    /// Messages still held by the queue, visible or in flight.
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.available.len() + state.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn visible(&self) -> usize {
        self.state.lock().unwrap().available.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.state.lock().unwrap().deleted.len()
    }

    pub fn poll_calls(&self) -> usize {
        self.state.lock().unwrap().poll_calls
    }

    /// Make the next `count` polls fail.
    pub fn fail_next_polls(&self, count: u32) {
        self.state.lock().unwrap().failing_polls = count;
    }

    pub fn fail_all_polls(&self) {
        self.state.lock().unwrap().always_fail_polls = true;
    }

    pub fn fail_deletes(&self, failing: bool) {
        self.state.lock().unwrap().failing_deletes = failing;
    }

    /// Let every visibility window lapse: in-flight messages become visible
    /// again and their handles stop working.
    pub fn release_in_flight(&self) {
        let mut state = self.state.lock().unwrap();
        let mut released: Vec<_> = state.in_flight.drain().map(|(_, m)| m).collect();
        released.sort_by_key(|m| m.id);
        for message in released.into_iter().rev() {
            state.available.push_front(message);
        }
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn poll(&self, _wait: Duration, max_messages: usize) -> Result<Vec<Delivery>> {
        let mut state = self.state.lock().unwrap();
        state.poll_calls += 1;
        if state.always_fail_polls {
            bail!("queue unavailable");
        }
        if state.failing_polls > 0 {
            state.failing_polls -= 1;
            bail!("transient queue failure");
        }

        let mut deliveries = Vec::new();
        while deliveries.len() < max_messages {
            let Some(message) = state.available.pop_front() else {
                break;
            };
            let receipt = format!("receipt-{}", state.next_receipt);
            state.next_receipt += 1;
            deliveries.push(Delivery::new(
                message.envelope.clone(),
                MessageHandle::new(receipt.clone()),
            ));
            state.in_flight.insert(receipt, message);
        }
        Ok(deliveries)
    }

    async fn delete(&self, handle: &MessageHandle) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_deletes {
            bail!("delete rejected");
        }
        match state.in_flight.remove(handle.receipt()) {
            Some(message) => {
                state.deleted.push(message.id);
                Ok(())
            }
            None => bail!("Unknown message handle {}", handle),
        }
    }
}
