use super::{NatsQueue, NatsTopic};
use anyhow::{Context, Result, bail};
use async_nats::jetstream;
use std::time::Duration;
use tracing::info;

/// Connection to the NATS server hosting the queue, the topics and,
/// by default, the artifact bucket.
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl std::fmt::Debug for NatsBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsBroker").finish_non_exhaustive()
    }
}

fn is_nats_url(url: &str) -> bool {
    ["nats://", "tls://", "ws://", "wss://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

impl NatsBroker {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self> {
        if !is_nats_url(url) {
            bail!("Unsupported queue URL '{}', expected a nats:// URL", url);
        }

        info!(url = %url, timeout_ms = timeout.as_millis() as u64, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .connection_timeout(timeout)
            .connect(url)
            .await
            .context("Failed to connect to NATS")?;

        let jetstream = jetstream::new(client.clone());

        info!("Successfully connected to NATS");
        Ok(Self { client, jetstream })
    }

    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Bind the durable consumer `consumer_name` on `stream_name`.
    pub async fn queue(
        &self,
        stream_name: &str,
        consumer_name: &str,
        visibility_timeout: Duration,
    ) -> Result<NatsQueue> {
        NatsQueue::bind(
            &self.jetstream,
            stream_name,
            consumer_name,
            visibility_timeout,
        )
        .await
    }

    pub fn topic(&self, stream_name: &str, subject: &str) -> NatsTopic {
        NatsTopic::new(self.jetstream.clone(), stream_name, subject)
    }

    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .context("Failed to flush NATS connection")
    }
}
