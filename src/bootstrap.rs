use crate::aggregator::Aggregator;
use crate::broker::{DigestTopic, NatsBroker, NotificationQueue};
use crate::config::DigestConfig;
use crate::storage::storage_factory::create_artifact_store;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

/// Connects every collaborator named in the configuration and wires them
/// into an aggregator.
pub async fn build_aggregator(config: &DigestConfig) -> Result<(NatsBroker, Aggregator)> {
    let settings = config
        .aggregator_settings()
        .context("Invalid aggregator settings")?;

    let broker = NatsBroker::connect(&config.queue_url, config.connect_timeout()).await?;

    let queue: Arc<dyn NotificationQueue> = Arc::new(
        broker
            .queue(
                &config.queue_name,
                &config.queue_id,
                config.visibility_timeout(),
            )
            .await
            .context("Failed to bind the notification queue")?,
    );

    let topic: Arc<dyn DigestTopic> =
        Arc::new(broker.topic(&config.topic_name, &config.topic_id));

    let dead_letter = config.dead_letter_subject.as_deref().map(|subject| {
        Arc::new(broker.topic(&config.topic_name, subject)) as Arc<dyn DigestTopic>
    });

    let store = create_artifact_store(
        config.bucket_url.as_deref(),
        &config.bucket_name,
        config.bucket_resource_id(),
        &broker,
    )
    .await
    .context("Failed to open the artifact store")?;

    info!(
        queue = %config.queue_name,
        consumer = %config.queue_id,
        topic = %config.topic_id,
        bucket = store.bucket(),
        format = %settings.format,
        poison_policy = %settings.poison_policy,
        "aggregator ready"
    );

    let aggregator = Aggregator::new(queue, store, topic, dead_letter, settings);
    Ok((broker, aggregator))
}
