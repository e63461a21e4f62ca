use super::ArtifactStore;
use crate::datamodel::ArtifactLocator;
use anyhow::{Context, Result};
use async_nats::jetstream;
use async_nats::jetstream::object_store::{InfoErrorKind, ObjectMetadata};
use async_nats::HeaderMap;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Artifact bucket stored in a JetStream object store.
pub struct NatsObjectStore {
    store: jetstream::object_store::ObjectStore,
    bucket: String,
    resource_id: String,
}

impl std::fmt::Debug for NatsObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsObjectStore")
            .field("bucket", &self.bucket)
            .field("resource_id", &self.resource_id)
            .finish_non_exhaustive()
    }
}

impl NatsObjectStore {
    pub async fn open(
        jetstream: &jetstream::Context,
        bucket_name: &str,
        resource_id: &str,
    ) -> Result<Self> {
        debug!(bucket = %bucket_name, "initializing object store client");

        let store = match jetstream.get_object_store(bucket_name).await {
            Ok(store) => {
                debug!(bucket = %bucket_name, "object store bucket already exists");
                store
            }
            Err(_) => {
                debug!(bucket = %bucket_name, "creating object store bucket");
                jetstream
                    .create_object_store(jetstream::object_store::Config {
                        bucket: bucket_name.to_string(),
                        ..Default::default()
                    })
                    .await
                    .context("failed to create object store bucket")?
            }
        };

        Ok(Self {
            store,
            bucket: bucket_name.to_string(),
            resource_id: resource_id.to_string(),
        })
    }
}

#[async_trait]
impl ArtifactStore for NatsObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.info(key).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == InfoErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).context("failed to check object existence"),
        }
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<ArtifactLocator> {
        debug!(bucket = %self.bucket, key = %key, content_type, size = body.len(), "uploading object");
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", content_type);
        let meta = ObjectMetadata {
            name: key.to_string(),
            headers: Some(headers),
            ..Default::default()
        };
        let mut reader = &body[..];
        self.store
            .put(meta, &mut reader)
            .await
            .context("failed to upload object")?;

        Ok(ArtifactLocator {
            bucket: self.bucket.clone(),
            key: key.to_string(),
            resource_id: self.resource_id.clone(),
            uri: format!("nats-object://{}/{}", self.bucket, key),
        })
    }
}
