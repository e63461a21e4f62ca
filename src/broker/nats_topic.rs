use super::DigestTopic;
use anyhow::{Context, Result};
use async_nats::HeaderMap;
use async_nats::jetstream;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::instrument;

/// Topic backed by a JetStream subject; attributes travel as headers.
pub struct NatsTopic {
    context: jetstream::Context,
    stream_name: String,
    subject: String,
}

impl std::fmt::Debug for NatsTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsTopic")
            .field("stream_name", &self.stream_name)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl NatsTopic {
    pub fn new(context: jetstream::Context, stream_name: &str, subject: &str) -> Self {
        Self {
            context,
            stream_name: stream_name.to_string(),
            subject: subject.to_string(),
        }
    }
}

#[async_trait]
impl DigestTopic for NatsTopic {
    fn name(&self) -> &str {
        &self.subject
    }

    #[instrument(skip(self, payload, attributes), fields(subject = %self.subject, payload_size = payload.len()))]
    async fn publish(&self, payload: Bytes, attributes: &BTreeMap<String, String>) -> Result<()> {
        let mut headers = HeaderMap::new();
        for (name, value) in attributes {
            headers.insert(name.as_str(), value.as_str());
        }

        let ack = self
            .context
            .publish_with_headers(self.subject.clone(), headers, payload)
            .await
            .context("Failed to publish message to JetStream")?;

        ack.await
            .context("Failed to receive JetStream acknowledgment")?;
        Ok(())
    }
}
