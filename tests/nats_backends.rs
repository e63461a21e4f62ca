use anyhow::Result;
use async_nats::jetstream::{self, stream};
use bytes::Bytes;
use snsdigest::broker::{DigestTopic, NatsBroker, NotificationQueue};
use snsdigest::datamodel::{DigestArtifact, DigestFormat};
use snsdigest::error::PersistError;
use snsdigest::retry::RetryPolicy;
use snsdigest::storage::nats_object::NatsObjectStore;
use snsdigest::storage::{ArtifactStore, ArtifactWriter};
use snsdigest::test_utils::fixtures::notification_envelope;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, Image};

#[derive(Debug, Clone)]
struct NatsWithJetStream {
    ports: Vec<ContainerPort>,
}

impl Default for NatsWithJetStream {
    fn default() -> Self {
        Self {
            ports: vec![ContainerPort::Tcp(4222)],
        }
    }
}

impl Image for NatsWithJetStream {
    fn name(&self) -> &str {
        "nats"
    }

    fn tag(&self) -> &str {
        "latest"
    }

    fn ready_conditions(&self) -> Vec<WaitFor> {
        vec![WaitFor::seconds(3)]
    }

    fn cmd(&self) -> impl IntoIterator<Item = impl Into<std::borrow::Cow<'_, str>>> {
        vec!["--js"]
    }

    fn expose_ports(&self) -> &[ContainerPort] {
        &self.ports
    }
}

async fn start_nats() -> Result<(ContainerAsync<NatsWithJetStream>, NatsBroker)> {
    let container = NatsWithJetStream::default().start().await?;
    let host = container.get_host().await?;
    let port = container.get_host_port_ipv4(4222).await?;
    let broker = NatsBroker::connect(&format!("nats://{}:{}", host, port), Duration::from_secs(10)).await?;
    Ok((container, broker))
}

async fn create_stream(jetstream: &jetstream::Context, name: &str, subject: &str) -> Result<stream::Stream> {
    let stream = jetstream
        .create_stream(stream::Config {
            name: name.to_string(),
            subjects: vec![subject.to_string()],
            ..Default::default()
        })
        .await?;
    Ok(stream)
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_queue_poll_and_delete() -> Result<()> {
    let (_container, broker) = start_nats().await?;
    let jetstream = broker.jetstream();
    create_stream(jetstream, "notifications", "notifications.raw").await?;
    for id in ["m-1", "m-2"] {
        jetstream
            .publish("notifications.raw", notification_envelope(id, "hello").into())
            .await?
            .await?;
    }

    let queue = broker
        .queue("notifications", "snsdigest-test", Duration::from_secs(30))
        .await?;
    let deliveries = queue.poll(Duration::from_secs(1), 10).await?;
    assert_eq!(deliveries.len(), 2);

    for delivery in &deliveries {
        queue.delete(&delivery.handle).await?;
    }
    // the receipt is spent once acknowledged
    assert!(queue.delete(&deliveries[0].handle).await.is_err());

    let again = queue.poll(Duration::from_millis(500), 10).await?;
    assert!(again.is_empty());
    Ok(())
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_topic_publishes_attributes_as_headers() -> Result<()> {
    let (_container, broker) = start_nats().await?;
    let stream = create_stream(broker.jetstream(), "digests", "notifications.digest").await?;

    let topic = broker.topic("digests", "notifications.digest");
    let attributes = BTreeMap::from([("OutputFormat".to_string(), "csv".to_string())]);
    topic
        .publish(Bytes::from_static(br#"{"Records":3}"#), &attributes)
        .await?;

    let message = stream
        .get_last_raw_message_by_subject("notifications.digest")
        .await?;
    assert_eq!(message.payload.as_ref(), br#"{"Records":3}"#);
    let header = message.headers.get("OutputFormat").map(|value| value.as_str());
    assert_eq!(header, Some("csv"));
    Ok(())
}

#[tokio::test]
#[cfg_attr(not(feature = "integration-tests"), ignore)]
async fn test_object_store_put_exists_and_collision() -> Result<()> {
    let (_container, broker) = start_nats().await?;
    let store = NatsObjectStore::open(broker.jetstream(), "digests", "digests-id").await?;

    assert!(!store.exists("digests/a.csv").await?);
    let locator = store
        .put("digests/a.csv", Bytes::from_static(b"MessageId\n"), "text/csv")
        .await?;
    assert_eq!(locator.uri, "nats-object://digests/digests/a.csv");
    assert!(store.exists("digests/a.csv").await?);

    let object_store = broker.jetstream().get_object_store("digests").await?;
    let info = object_store.info("digests/a.csv").await?;
    let content_type = info
        .headers
        .as_ref()
        .and_then(|headers| headers.get("Content-Type"))
        .map(|value| value.as_str().to_string());
    assert_eq!(content_type.as_deref(), Some("text/csv"));

    let writer = ArtifactWriter::new(Arc::new(store), "digests/", RetryPolicy::no_retry());
    let artifact = DigestArtifact {
        name: "a.csv".to_string(),
        format: DigestFormat::Csv,
        body: Bytes::from_static(b"MessageId\n"),
        record_count: 0,
    };
    let err = writer.write(&artifact).await.unwrap_err();
    assert!(matches!(err, PersistError::KeyCollision { .. }));
    Ok(())
}
