use crate::broker::DigestTopic;
use crate::datamodel::{
    ArtifactLocator, DIGEST_SUBJECT, DigestDateTime, DigestFormat, DigestNotification,
};
use crate::error::PublishError;
use crate::retry::{RetryPolicy, retry_with_backoff};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub const FORMAT_ATTRIBUTE: &str = "digest-format";
pub const RECORD_COUNT_ATTRIBUTE: &str = "digest-record-count";
pub const INVOCATION_ID_ATTRIBUTE: &str = "digest-invocation-id";

/// Announces a written artifact on the output topic.
#[derive(Debug, Clone)]
pub struct DigestPublisher {
    topic: Arc<dyn DigestTopic>,
    retry: RetryPolicy,
}

impl DigestPublisher {
    pub fn new(topic: Arc<dyn DigestTopic>, retry: RetryPolicy) -> Self {
        Self { topic, retry }
    }

    pub fn build_notification(
        invocation_id: &str,
        generated_at: &DigestDateTime,
        format: DigestFormat,
        record_count: usize,
        rejected_count: usize,
        artifact: ArtifactLocator,
    ) -> DigestNotification {
        DigestNotification {
            subject: DIGEST_SUBJECT.to_string(),
            invocation_id: invocation_id.to_string(),
            generated_at: generated_at.to_rfc3339(),
            format,
            record_count,
            rejected_count,
            artifact,
        }
    }

    pub fn attributes(notification: &DigestNotification) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                FORMAT_ATTRIBUTE.to_string(),
                notification.format.as_str().to_string(),
            ),
            (
                RECORD_COUNT_ATTRIBUTE.to_string(),
                notification.record_count.to_string(),
            ),
            (
                INVOCATION_ID_ATTRIBUTE.to_string(),
                notification.invocation_id.clone(),
            ),
        ])
    }

    /// Publishes exactly one message for the digest.
    pub async fn publish(&self, notification: &DigestNotification) -> Result<(), PublishError> {
        let payload = Bytes::from(serde_json::to_vec(notification)?);
        let attributes = Self::attributes(notification);
        let topic = &self.topic;

        retry_with_backoff(&self.retry, "topic.publish", || {
            topic.publish(payload.clone(), &attributes)
        })
        .await
        .map_err(|e| PublishError::Transport {
            attempts: e.attempts,
            source: e.source,
        })?;

        info!(
            topic = topic.name(),
            invocation_id = %notification.invocation_id,
            records = notification.record_count,
            artifact = %notification.artifact,
            "digest notification published"
        );
        Ok(())
    }
}
