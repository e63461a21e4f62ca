#![allow(dead_code)]

use snsdigest::aggregator::AggregatorSettings;
use snsdigest::datamodel::DigestFormat;
use snsdigest::retry::RetryPolicy;
use snsdigest::test_utils::{PublishedMessage, TestPipeline};
use std::time::Duration;

/// Settings tuned so an invocation against in-memory collaborators finishes
/// in milliseconds.
pub fn fast_settings(format: DigestFormat) -> AggregatorSettings {
    AggregatorSettings {
        format,
        invocation_timeout: Duration::from_secs(5),
        collection_headroom: Duration::from_secs(1),
        poll_wait: Duration::from_millis(5),
        retry: RetryPolicy {
            attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
        ..AggregatorSettings::default()
    }
}

pub fn pipeline(format: DigestFormat) -> TestPipeline {
    TestPipeline::new(fast_settings(format))
}

/// The stored artifact body referenced by a published digest notification.
pub fn artifact_body(pipeline: &TestPipeline, message: &PublishedMessage) -> Vec<u8> {
    let body = message.json();
    let key = body["artifact"]["key"].as_str().unwrap();
    pipeline.store.get(key).unwrap().body.to_vec()
}
