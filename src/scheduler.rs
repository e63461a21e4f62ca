use crate::aggregator::{Aggregator, InvocationFailure, InvocationReport};
use anyhow::Result;
use sentry::integrations::anyhow::capture_anyhow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Fires an invocation on every tick. Ticks do not wait for earlier
/// invocations, so runs may overlap; the queue's visibility window is the
/// only coordination between them.
#[derive(Debug, Clone)]
pub struct Scheduler {
    aggregator: Arc<Aggregator>,
    period: Duration,
}

impl Scheduler {
    pub fn new(aggregator: Arc<Aggregator>, period: Duration) -> Self {
        Self { aggregator, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Runs until `shutdown` resolves, then waits for in-flight invocations.
    pub async fn serve<S>(&self, shutdown: S) -> Result<SchedulerSummary>
    where
        S: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut invocations: JoinSet<Result<InvocationReport, InvocationFailure>> = JoinSet::new();
        let mut summary = SchedulerSummary::default();
        tokio::pin!(shutdown);

        info!(period_seconds = self.period.as_secs_f64(), "scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(in_flight = invocations.len(), "scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    if !invocations.is_empty() {
                        warn!(in_flight = invocations.len(), "previous invocation still running");
                    }
                    let aggregator = self.aggregator.clone();
                    invocations.spawn(async move { aggregator.invoke().await });
                    summary.started += 1;
                }
                Some(joined) = invocations.join_next() => {
                    Self::record(&mut summary, joined);
                }
            }
        }

        while let Some(joined) = invocations.join_next().await {
            Self::record(&mut summary, joined);
        }
        info!(
            started = summary.started,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "scheduler stopped"
        );
        Ok(summary)
    }

    fn record(
        summary: &mut SchedulerSummary,
        joined: Result<Result<InvocationReport, InvocationFailure>, tokio::task::JoinError>,
    ) {
        match joined {
            Ok(Ok(_)) => summary.succeeded += 1,
            Ok(Err(failure)) => {
                summary.failed += 1;
                capture_anyhow(&anyhow::Error::new(failure));
            }
            Err(join_error) => {
                summary.failed += 1;
                error!(error = %join_error, "invocation task aborted");
                capture_anyhow(&anyhow::Error::new(join_error));
            }
        }
    }
}

/// A single invocation, for `run` mode.
pub async fn run_once(aggregator: &Aggregator) -> Result<InvocationReport> {
    match aggregator.invoke().await {
        Ok(report) => Ok(report),
        Err(failure) => {
            let error = anyhow::Error::new(failure);
            capture_anyhow(&error);
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorSettings;
    use crate::retry::RetryPolicy;
    use crate::test_utils::TestPipeline;
    use crate::test_utils::fixtures::notification_envelope;

    fn settings() -> AggregatorSettings {
        AggregatorSettings {
            poll_wait: Duration::from_millis(1),
            retry: RetryPolicy::no_retry(),
            ..AggregatorSettings::default()
        }
    }

    #[tokio::test]
    async fn test_fires_until_shutdown() {
        let pipeline = TestPipeline::new(settings());
        pipeline.queue.push(notification_envelope("m-1", "x"));
        let scheduler = Scheduler::new(
            Arc::new(pipeline.aggregator.clone()),
            Duration::from_millis(20),
        );

        let summary = scheduler
            .serve(tokio::time::sleep(Duration::from_millis(70)))
            .await
            .unwrap();

        assert!(summary.started >= 2, "{:?}", summary);
        assert_eq!(summary.succeeded + summary.failed, summary.started);
        assert_eq!(summary.failed, 0);
        assert_eq!(pipeline.topic.published().len(), 1);
        assert!(pipeline.queue.is_empty());
    }

    #[tokio::test]
    async fn test_failed_invocations_are_counted() {
        let pipeline = TestPipeline::new(settings());
        pipeline.queue.fail_all_polls();
        let scheduler = Scheduler::new(
            Arc::new(pipeline.aggregator.clone()),
            Duration::from_millis(20),
        );

        let summary = scheduler
            .serve(tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();

        assert!(summary.failed >= 1);
        assert_eq!(summary.succeeded, 0);
    }

    #[tokio::test]
    async fn test_run_once_reports_failure() {
        let pipeline = TestPipeline::new(settings());
        pipeline.queue.fail_all_polls();
        assert!(run_once(&pipeline.aggregator).await.is_err());
    }
}
