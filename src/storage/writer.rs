use super::ArtifactStore;
use crate::datamodel::{ArtifactLocator, DigestArtifact};
use crate::error::PersistError;
use crate::retry::{RetryPolicy, retry_with_backoff};
use std::sync::Arc;
use tracing::info;

/// Persists rendered digests as new objects, never replacing an existing one.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    store: Arc<dyn ArtifactStore>,
    key_prefix: String,
    retry: RetryPolicy,
}

impl ArtifactWriter {
    pub fn new(store: Arc<dyn ArtifactStore>, key_prefix: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            store,
            key_prefix: key_prefix.into(),
            retry,
        }
    }

    pub fn object_key(&self, artifact: &DigestArtifact) -> String {
        format!("{}{}", self.key_prefix, artifact.name)
    }

    pub async fn write(&self, artifact: &DigestArtifact) -> Result<ArtifactLocator, PersistError> {
        let key = self.object_key(artifact);
        let store = &self.store;

        let exists = retry_with_backoff(&self.retry, "store.exists", || store.exists(&key))
            .await
            .map_err(|e| PersistError::Write {
                key: key.clone(),
                attempts: e.attempts,
                source: e.source,
            })?;
        if exists {
            return Err(PersistError::KeyCollision {
                bucket: store.bucket().to_string(),
                key,
            });
        }

        let locator = retry_with_backoff(&self.retry, "store.put", || {
            store.put(&key, artifact.body.clone(), artifact.content_type())
        })
        .await
        .map_err(|e| PersistError::Write {
            key: key.clone(),
            attempts: e.attempts,
            source: e.source,
        })?;

        info!(
            bucket = %locator.bucket,
            key = %locator.key,
            size = artifact.body.len(),
            records = artifact.record_count,
            "digest artifact written"
        );
        Ok(locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::DigestFormat;
    use crate::test_utils::MemoryStore;
    use bytes::Bytes;
    use std::time::Duration;

    fn artifact(name: &str) -> DigestArtifact {
        DigestArtifact {
            name: name.to_string(),
            format: DigestFormat::Csv,
            body: Bytes::from_static(b"MessageId,Timestamp,TopicArn\n"),
            record_count: 0,
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_write_uses_prefix_and_content_type() {
        let store = Arc::new(MemoryStore::new("digests"));
        let writer = ArtifactWriter::new(store.clone(), "digests/", fast_retry());

        let locator = writer.write(&artifact("a.csv")).await.unwrap();

        assert_eq!(locator.key, "digests/a.csv");
        assert_eq!(locator.bucket, "digests");
        let stored = store.get("digests/a.csv").unwrap();
        assert_eq!(stored.content_type, "text/csv");
        assert_eq!(stored.body, Bytes::from_static(b"MessageId,Timestamp,TopicArn\n"));
    }

    #[tokio::test]
    async fn test_write_refuses_collisions() {
        let store = Arc::new(MemoryStore::new("digests"));
        let writer = ArtifactWriter::new(store.clone(), "", fast_retry());

        writer.write(&artifact("same.csv")).await.unwrap();
        let err = writer.write(&artifact("same.csv")).await.unwrap_err();

        assert!(matches!(err, PersistError::KeyCollision { .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_write_retries_transient_failures() {
        let store = Arc::new(MemoryStore::new("digests"));
        store.fail_next_puts(2);
        let writer = ArtifactWriter::new(store.clone(), "", fast_retry());

        writer.write(&artifact("a.csv")).await.unwrap();
        assert_eq!(store.put_calls(), 3);
    }

    #[tokio::test]
    async fn test_write_fails_after_retry_budget() {
        let store = Arc::new(MemoryStore::failing("digests"));
        let writer = ArtifactWriter::new(store.clone(), "", fast_retry());

        let err = writer.write(&artifact("a.csv")).await.unwrap_err();
        assert!(matches!(err, PersistError::Write { attempts: 3, .. }));
        assert!(store.is_empty());
    }
}
