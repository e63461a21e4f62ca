pub mod state;

pub use state::{InvocationState, StateMachine};

use crate::broker::{DigestTopic, NotificationQueue};
use crate::collector::{BatchCollector, Collection, CollectorSettings, RejectedDelivery};
use crate::datamodel::{
    ArtifactLocator, DigestDateTime, DigestDateTimeExt, DigestFormat, MessageHandle,
};
use crate::error::InvocationError;
use crate::exporters::DigestFormatter;
use crate::publisher::DigestPublisher;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::storage::{ArtifactStore, ArtifactWriter};
use anyhow::anyhow;
use futures::{StreamExt, stream};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

pub const REJECTION_REASON_ATTRIBUTE: &str = "digest-rejection-reason";

const ACK_CONCURRENCY: usize = 16;

/// What happens to envelopes that cannot be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoisonPolicy {
    #[default]
    Delete,
    /// Forward the raw envelope to the dead-letter topic, then delete it.
    DeadLetter,
}

impl FromStr for PoisonPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "delete" => Ok(PoisonPolicy::Delete),
            "dead-letter" | "deadletter" => Ok(PoisonPolicy::DeadLetter),
            other => Err(anyhow!("Unknown poison message policy: {}", other)),
        }
    }
}

impl fmt::Display for PoisonPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoisonPolicy::Delete => f.write_str("delete"),
            PoisonPolicy::DeadLetter => f.write_str("dead-letter"),
        }
    }
}

/// Immutable per-deployment settings handed to every invocation.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub format: DigestFormat,
    pub invocation_timeout: Duration,
    /// Time reserved after collection for formatting, writing and publishing.
    pub collection_headroom: Duration,
    pub max_batch_size: usize,
    pub poll_max_messages: usize,
    pub poll_wait: Duration,
    pub retry: RetryPolicy,
    pub key_prefix: String,
    pub poison_policy: PoisonPolicy,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            format: DigestFormat::Csv,
            invocation_timeout: Duration::from_secs(600),
            collection_headroom: Duration::from_secs(60),
            max_batch_size: 10_000,
            poll_max_messages: 10,
            poll_wait: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            key_prefix: "digests/".to_string(),
            poison_policy: PoisonPolicy::Delete,
        }
    }
}

impl AggregatorSettings {
    pub fn collection_budget(&self) -> Duration {
        self.invocation_timeout
            .saturating_sub(self.collection_headroom)
    }

    pub fn collector_settings(&self) -> CollectorSettings {
        CollectorSettings {
            max_batch_size: self.max_batch_size,
            poll_max_messages: self.poll_max_messages,
            poll_wait: self.poll_wait,
            budget: self.collection_budget(),
            retry: self.retry.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckOutcome {
    pub acknowledged: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl AckOutcome {
    fn merge(self, other: AckOutcome) -> AckOutcome {
        AckOutcome {
            acknowledged: self.acknowledged + other.acknowledged,
            failed: self.failed + other.failed,
            dead_lettered: self.dead_lettered + other.dead_lettered,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationReport {
    pub invocation_id: String,
    pub final_state: InvocationState,
    pub trail: Vec<InvocationState>,
    pub records: usize,
    pub rejected: usize,
    pub duplicates: usize,
    pub acknowledged: usize,
    pub ack_failures: usize,
    pub dead_lettered: usize,
    pub artifact: Option<ArtifactLocator>,
}

/// An invocation that ended in `Failed`. Handles collected before the
/// failure were left to the queue's redelivery.
#[derive(Error, Debug)]
#[error("Invocation {invocation_id} failed while {failed_in}: {error}")]
pub struct InvocationFailure {
    pub invocation_id: String,
    pub failed_in: InvocationState,
    #[source]
    pub error: InvocationError,
    pub trail: Vec<InvocationState>,
}

/// Sequences collect, format, write, publish and acknowledge for one
/// scheduled invocation.
#[derive(Debug, Clone)]
pub struct Aggregator {
    queue: Arc<dyn NotificationQueue>,
    collector: BatchCollector,
    formatter: DigestFormatter,
    writer: ArtifactWriter,
    publisher: DigestPublisher,
    dead_letter: Option<Arc<dyn DigestTopic>>,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        store: Arc<dyn ArtifactStore>,
        topic: Arc<dyn DigestTopic>,
        dead_letter: Option<Arc<dyn DigestTopic>>,
        settings: AggregatorSettings,
    ) -> Self {
        if settings.poison_policy == PoisonPolicy::DeadLetter && dead_letter.is_none() {
            warn!("dead-letter policy without a dead-letter topic, malformed envelopes will be deleted");
        }
        Self {
            collector: BatchCollector::new(queue.clone(), settings.collector_settings()),
            formatter: DigestFormatter::new(settings.format),
            writer: ArtifactWriter::new(store, settings.key_prefix.clone(), settings.retry.clone()),
            publisher: DigestPublisher::new(topic, settings.retry.clone()),
            queue,
            dead_letter,
            settings,
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Runs one invocation under the configured deadline.
    pub async fn invoke(&self) -> Result<InvocationReport, InvocationFailure> {
        let invocation_id = Uuid::new_v4().to_string();
        let span = info_span!("invocation", invocation_id = %invocation_id);
        let mut machine = StateMachine::new();
        let timeout = self.settings.invocation_timeout;

        let outcome = tokio::time::timeout(
            timeout,
            self.run(&invocation_id, &mut machine)
                .instrument(span.clone()),
        )
        .await;

        let error = match outcome {
            Ok(Ok(report)) => {
                span.in_scope(|| {
                    info!(
                        records = report.records,
                        rejected = report.rejected,
                        acknowledged = report.acknowledged,
                        ack_failures = report.ack_failures,
                        final_state = %report.final_state,
                        "invocation finished"
                    )
                });
                return Ok(report);
            }
            Ok(Err(error)) => error,
            Err(_) => InvocationError::DeadlineExceeded(timeout),
        };

        let failed_in = machine.fail();
        span.in_scope(|| error!(%failed_in, %error, "invocation failed"));
        Err(InvocationFailure {
            invocation_id,
            failed_in,
            error,
            trail: machine.trail().to_vec(),
        })
    }

    async fn run(
        &self,
        invocation_id: &str,
        machine: &mut StateMachine,
    ) -> Result<InvocationReport, InvocationError> {
        machine.advance(InvocationState::Collecting)?;
        let Collection {
            batch,
            rejected,
            duplicates,
            ..
        } = self.collector.collect().await?;

        let mut report = InvocationReport {
            invocation_id: invocation_id.to_string(),
            final_state: InvocationState::Collecting,
            trail: Vec::new(),
            records: batch.len(),
            rejected: rejected.len(),
            duplicates: duplicates.len(),
            acknowledged: 0,
            ack_failures: 0,
            dead_lettered: 0,
            artifact: None,
        };

        if batch.is_empty() {
            machine.advance(InvocationState::Empty)?;
            // No digest references these, so they can go right away.
            let outcome = self
                .dispose_rejected(&rejected)
                .await
                .merge(self.acknowledge(duplicates).await);
            machine.advance(InvocationState::Done)?;
            return Ok(Self::finish(report, outcome, machine));
        }

        machine.advance(InvocationState::Formatting)?;
        let generated_at = DigestDateTime::now_utc().map_err(InvocationError::Setup)?;
        let artifact = self
            .formatter
            .render(&batch, &generated_at, Uuid::new_v4())
            .await?;

        machine.advance(InvocationState::Writing)?;
        let locator = self.writer.write(&artifact).await?;

        machine.advance(InvocationState::Publishing)?;
        let notification = DigestPublisher::build_notification(
            invocation_id,
            &generated_at,
            self.formatter.format(),
            batch.len(),
            rejected.len(),
            locator.clone(),
        );
        self.publisher.publish(&notification).await?;
        report.artifact = Some(locator);

        machine.advance(InvocationState::Acknowledging)?;
        let handles: Vec<MessageHandle> = batch.into_handles().into_iter().chain(duplicates).collect();
        let outcome = self
            .acknowledge(handles)
            .await
            .merge(self.dispose_rejected(&rejected).await);

        machine.advance(InvocationState::Done)?;
        Ok(Self::finish(report, outcome, machine))
    }

    fn finish(
        mut report: InvocationReport,
        outcome: AckOutcome,
        machine: &StateMachine,
    ) -> InvocationReport {
        report.acknowledged = outcome.acknowledged;
        report.ack_failures = outcome.failed;
        report.dead_lettered = outcome.dead_lettered;
        report.final_state = machine.current();
        report.trail = machine.trail().to_vec();
        report
    }

    /// Deletes handles concurrently. A failed delete is not fatal: the
    /// message comes back after its visibility window.
    async fn acknowledge(&self, handles: Vec<MessageHandle>) -> AckOutcome {
        if handles.is_empty() {
            return AckOutcome::default();
        }
        let retry = &self.settings.retry;
        let queue = &self.queue;

        let results: Vec<bool> = stream::iter(handles)
            .map(|handle| async move {
                match retry_with_backoff(retry, "queue.delete", || queue.delete(&handle)).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(%handle, error = %e.source, "failed to acknowledge delivery");
                        false
                    }
                }
            })
            .buffer_unordered(ACK_CONCURRENCY)
            .collect()
            .await;

        let acknowledged = results.iter().filter(|ok| **ok).count();
        AckOutcome {
            acknowledged,
            failed: results.len() - acknowledged,
            dead_lettered: 0,
        }
    }

    async fn dispose_rejected(&self, rejected: &[RejectedDelivery]) -> AckOutcome {
        if rejected.is_empty() {
            return AckOutcome::default();
        }
        let dead_letter = match (self.settings.poison_policy, &self.dead_letter) {
            (PoisonPolicy::DeadLetter, Some(topic)) => Some(topic),
            _ => None,
        };
        let Some(topic) = dead_letter else {
            info!(count = rejected.len(), "deleting malformed envelopes");
            return self
                .acknowledge(rejected.iter().map(|r| r.delivery.handle.clone()).collect())
                .await;
        };

        let mut forwarded = Vec::with_capacity(rejected.len());
        let mut outcome = AckOutcome::default();
        for rejection in rejected {
            let attributes = BTreeMap::from([(
                REJECTION_REASON_ATTRIBUTE.to_string(),
                rejection.error.to_string(),
            )]);
            let envelope = rejection.delivery.envelope.clone();
            match retry_with_backoff(&self.settings.retry, "dead_letter.publish", || {
                topic.publish(envelope.clone(), &attributes)
            })
            .await
            {
                Ok(()) => forwarded.push(rejection.delivery.handle.clone()),
                Err(e) => {
                    // Kept on the queue so it can be forwarded on a later run.
                    warn!(handle = %rejection.delivery.handle, error = %e.source, "failed to dead-letter envelope");
                    outcome.failed += 1;
                }
            }
        }
        outcome.dead_lettered = forwarded.len();
        info!(
            topic = topic.name(),
            count = forwarded.len(),
            "malformed envelopes dead-lettered"
        );
        outcome.merge(self.acknowledge(forwarded).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestPipeline;
    use crate::test_utils::fixtures::{malformed_envelope, notification_envelope};

    fn settings() -> AggregatorSettings {
        AggregatorSettings {
            poll_wait: Duration::from_millis(5),
            retry: RetryPolicy {
                attempts: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(1),
            },
            ..AggregatorSettings::default()
        }
    }

    #[test]
    fn test_parse_poison_policy() {
        assert_eq!("delete".parse::<PoisonPolicy>().unwrap(), PoisonPolicy::Delete);
        assert_eq!(
            "dead_letter".parse::<PoisonPolicy>().unwrap(),
            PoisonPolicy::DeadLetter
        );
        assert!("keep".parse::<PoisonPolicy>().is_err());
    }

    #[test]
    fn test_collection_budget_leaves_headroom() {
        let settings = AggregatorSettings {
            invocation_timeout: Duration::from_secs(600),
            collection_headroom: Duration::from_secs(60),
            ..AggregatorSettings::default()
        };
        assert_eq!(settings.collection_budget(), Duration::from_secs(540));
        assert_eq!(settings.collector_settings().budget, Duration::from_secs(540));
    }

    #[tokio::test]
    async fn test_success_trail() {
        let pipeline = TestPipeline::new(settings());
        pipeline.queue.push(notification_envelope("m-1", "hello"));

        let report = pipeline.aggregator.invoke().await.unwrap();

        assert_eq!(
            report.trail,
            vec![
                InvocationState::Idle,
                InvocationState::Collecting,
                InvocationState::Formatting,
                InvocationState::Writing,
                InvocationState::Publishing,
                InvocationState::Acknowledging,
                InvocationState::Done,
            ]
        );
        assert_eq!(report.acknowledged, 1);
        assert!(report.artifact.is_some());
    }

    #[tokio::test]
    async fn test_only_malformed_envelopes_take_empty_path() {
        let pipeline = TestPipeline::new(settings());
        pipeline.queue.push(malformed_envelope());

        let report = pipeline.aggregator.invoke().await.unwrap();

        assert_eq!(report.final_state, InvocationState::Done);
        assert!(report.trail.contains(&InvocationState::Empty));
        assert_eq!(report.rejected, 1);
        assert_eq!(report.acknowledged, 1);
        assert!(pipeline.store.is_empty());
        assert!(pipeline.topic.published().is_empty());
        assert!(pipeline.queue.is_empty());
    }

    #[tokio::test]
    async fn test_ack_failures_are_counted_not_fatal() {
        let pipeline = TestPipeline::new(settings());
        pipeline.queue.push(notification_envelope("m-1", "hello"));
        pipeline.queue.fail_deletes(true);

        let report = pipeline.aggregator.invoke().await.unwrap();

        assert_eq!(report.final_state, InvocationState::Done);
        assert_eq!(report.acknowledged, 0);
        assert_eq!(report.ack_failures, 1);
        assert_eq!(pipeline.topic.published().len(), 1);
        assert_eq!(pipeline.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_fails_in_writing() {
        let pipeline = TestPipeline::new(settings());
        pipeline.queue.push(notification_envelope("m-1", "hello"));
        pipeline.store.fail_next_puts(10);

        let failure = pipeline.aggregator.invoke().await.unwrap_err();

        assert_eq!(failure.failed_in, InvocationState::Writing);
        assert!(matches!(failure.error, InvocationError::Persist(_)));
        assert_eq!(failure.trail.last(), Some(&InvocationState::Failed));
        assert!(pipeline.topic.published().is_empty());
        assert_eq!(pipeline.queue.deleted_count(), 0);
    }
}
