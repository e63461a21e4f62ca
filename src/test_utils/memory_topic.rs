use crate::broker::DigestTopic;
use anyhow::{Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub payload: Bytes,
    pub attributes: BTreeMap<String, String>,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

#[derive(Debug, Default)]
struct TopicState {
    published: Vec<PublishedMessage>,
    failing_publishes: u32,
    always_fail: bool,
    delay: Duration,
    publish_calls: usize,
}

#[derive(Debug)]
pub struct MemoryTopic {
    name: String,
    state: Mutex<TopicState>,
}

impl MemoryTopic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(TopicState::default()),
        }
    }

    /// A topic whose broker never accepts anything.
    pub fn failing(name: &str) -> Self {
        let topic = Self::new(name);
        topic.state.lock().unwrap().always_fail = true;
        topic
    }

    pub fn fail_next_publishes(&self, count: u32) {
        self.state.lock().unwrap().failing_publishes = count;
    }

    /// Hold every publish for `delay` before answering.
    pub fn delay_publishes(&self, delay: Duration) {
        self.state.lock().unwrap().delay = delay;
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn publish_calls(&self) -> usize {
        self.state.lock().unwrap().publish_calls
    }
}

#[async_trait]
impl DigestTopic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, payload: Bytes, attributes: &BTreeMap<String, String>) -> Result<()> {
        let delay = self.state.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.publish_calls += 1;
        if state.always_fail {
            bail!("topic {} unavailable", self.name);
        }
        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            bail!("transient publish failure");
        }
        state.published.push(PublishedMessage {
            payload,
            attributes: attributes.clone(),
        });
        Ok(())
    }
}
