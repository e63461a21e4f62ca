use std::sync::Arc;

use anyhow::{Result, bail};

use super::ArtifactStore;
use super::local::LocalDirectoryStore;
use super::nats_object::NatsObjectStore;
use crate::broker::NatsBroker;

/// Select the artifact store backend.
///
/// Without a URL (or with a `nats:` one) the bucket lives in the JetStream
/// object store of the broker connection.
pub async fn create_artifact_store(
    bucket_url: Option<&str>,
    bucket_name: &str,
    resource_id: &str,
    broker: &NatsBroker,
) -> Result<Arc<dyn ArtifactStore>> {
    Ok(match bucket_url {
        None => Arc::new(NatsObjectStore::open(broker.jetstream(), bucket_name, resource_id).await?),
        Some(s) if s.starts_with("nats:") => {
            Arc::new(NatsObjectStore::open(broker.jetstream(), bucket_name, resource_id).await?)
        }
        Some(s) if s.starts_with("file:") => {
            Arc::new(LocalDirectoryStore::open(s, bucket_name, resource_id).await?)
        }
        Some(s) => bail!("Unsupported artifact store URL: {}", s),
    })
}
