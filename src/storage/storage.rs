use crate::datamodel::ArtifactLocator;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;

/// Durable object store holding digest artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync + Debug {
    fn bucket(&self) -> &str;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Write a new object and return where it lives.
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<ArtifactLocator>;
}
