use crate::aggregator::{AggregatorSettings, PoisonPolicy};
use crate::datamodel::DigestFormat;
use crate::retry::RetryPolicy;
use anyhow::{Error, bail};
use confique::Config;
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

#[derive(Debug, Config)]
pub struct DigestConfig {
    /// Queue endpoint. The NATS server holding the inbound stream.
    #[config(env = "SNSDIGEST_QUEUE_URL", default = "nats://127.0.0.1:4222")]
    pub queue_url: String,

    /// Stream buffering the forwarded notifications.
    #[config(env = "SNSDIGEST_QUEUE_NAME", default = "notifications")]
    pub queue_name: String,

    /// Durable consumer name.
    #[config(env = "SNSDIGEST_QUEUE_ID", default = "snsdigest-aggregator")]
    pub queue_id: String,

    #[config(env = "SNSDIGEST_VISIBILITY_TIMEOUT_SECONDS", default = 660)]
    pub visibility_timeout_seconds: u64,

    /// Subject the digest notifications are published to.
    #[config(env = "SNSDIGEST_TOPIC_ID", default = "notifications.digest")]
    pub topic_id: String,

    #[config(env = "SNSDIGEST_TOPIC_NAME", default = "notifications-digest")]
    pub topic_name: String,

    #[config(env = "SNSDIGEST_BUCKET_NAME", default = "notifications-digest")]
    pub bucket_name: String,

    /// `file:///some/dir` for a local directory, unset for the NATS object store.
    #[config(env = "SNSDIGEST_BUCKET_URL")]
    pub bucket_url: Option<String>,

    #[config(env = "SNSDIGEST_BUCKET_ID")]
    pub bucket_id: Option<String>,

    #[config(env = "SNSDIGEST_OUTPUT_FORMAT", default = "csv")]
    pub output_format: String,

    #[config(env = "SNSDIGEST_KEY_PREFIX", default = "digests/")]
    pub key_prefix: String,

    #[config(env = "SNSDIGEST_SCHEDULE_SECONDS", default = 300)]
    pub schedule_seconds: u64,

    #[config(env = "SNSDIGEST_INVOCATION_TIMEOUT_SECONDS", default = 600)]
    pub invocation_timeout_seconds: u64,

    #[config(env = "SNSDIGEST_COLLECTION_HEADROOM_SECONDS", default = 60)]
    pub collection_headroom_seconds: u64,

    #[config(env = "SNSDIGEST_MAX_BATCH_SIZE", default = 10000)]
    pub max_batch_size: usize,

    #[config(env = "SNSDIGEST_POLL_MAX_MESSAGES", default = 10)]
    pub poll_max_messages: usize,

    #[config(env = "SNSDIGEST_POLL_WAIT_MILLISECONDS", default = 1000)]
    pub poll_wait_milliseconds: u64,

    #[config(env = "SNSDIGEST_RETRY_ATTEMPTS", default = 3)]
    pub retry_attempts: u32,

    #[config(env = "SNSDIGEST_RETRY_INITIAL_BACKOFF_MILLISECONDS", default = 200)]
    pub retry_initial_backoff_milliseconds: u64,

    #[config(env = "SNSDIGEST_RETRY_MAX_BACKOFF_MILLISECONDS", default = 5000)]
    pub retry_max_backoff_milliseconds: u64,

    #[config(env = "SNSDIGEST_POISON_POLICY", default = "delete")]
    pub poison_policy: String,

    #[config(env = "SNSDIGEST_DEAD_LETTER_SUBJECT")]
    pub dead_letter_subject: Option<String>,

    #[config(env = "SNSDIGEST_SENTRY_DSN")]
    pub sentry_dsn: Option<String>,

    #[config(env = "SNSDIGEST_CONNECT_TIMEOUT_SECONDS", default = 10)]
    pub connect_timeout_seconds: u64,
}

impl DigestConfig {
    pub fn load() -> Result<DigestConfig, Error> {
        let c = DigestConfig::builder()
            .env()
            .file("settings.toml")
            .load()?;

        c.validate()?;
        Ok(c)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.collection_headroom_seconds >= self.invocation_timeout_seconds {
            bail!(
                "Collection headroom ({}s) must be shorter than the invocation timeout ({}s)",
                self.collection_headroom_seconds,
                self.invocation_timeout_seconds
            );
        }
        if self.visibility_timeout_seconds <= self.invocation_timeout_seconds {
            bail!(
                "Visibility timeout ({}s) must be longer than the invocation timeout ({}s)",
                self.visibility_timeout_seconds,
                self.invocation_timeout_seconds
            );
        }
        if self.max_batch_size == 0 {
            bail!("Max batch size must be greater than zero");
        }
        if self.poll_max_messages == 0 {
            bail!("Poll max messages must be greater than zero");
        }
        if self.schedule_seconds == 0 {
            bail!("Schedule period must be greater than zero");
        }
        let policy = self.poison_policy()?;
        if policy == PoisonPolicy::DeadLetter && self.dead_letter_subject.is_none() {
            bail!("The dead-letter poison policy requires SNSDIGEST_DEAD_LETTER_SUBJECT");
        }
        self.output_format()?;
        Ok(())
    }

    pub fn output_format(&self) -> Result<DigestFormat, Error> {
        self.output_format.parse()
    }

    pub fn poison_policy(&self) -> Result<PoisonPolicy, Error> {
        self.poison_policy.parse()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts.max(1),
            initial_backoff: Duration::from_millis(self.retry_initial_backoff_milliseconds),
            max_backoff: Duration::from_millis(self.retry_max_backoff_milliseconds),
        }
    }

    /// Resource identity of the bucket, the bucket name unless overridden.
    pub fn bucket_resource_id(&self) -> &str {
        self.bucket_id.as_deref().unwrap_or(&self.bucket_name)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn schedule_period(&self) -> Duration {
        Duration::from_secs(self.schedule_seconds)
    }

    pub fn aggregator_settings(&self) -> Result<AggregatorSettings, Error> {
        Ok(AggregatorSettings {
            format: self.output_format()?,
            invocation_timeout: Duration::from_secs(self.invocation_timeout_seconds),
            collection_headroom: Duration::from_secs(self.collection_headroom_seconds),
            max_batch_size: self.max_batch_size,
            poll_max_messages: self.poll_max_messages,
            poll_wait: Duration::from_millis(self.poll_wait_milliseconds),
            retry: self.retry_policy(),
            key_prefix: self.key_prefix.clone(),
            poison_policy: self.poison_policy()?,
        })
    }
}

static DIGEST_CONFIG: OnceLock<Arc<DigestConfig>> = OnceLock::new();

pub fn get() -> Result<Arc<DigestConfig>, Error> {
    DIGEST_CONFIG.get().cloned().ok_or_else(|| {
        Error::msg(
            "Configuration not loaded. Please call load_configuration() before using the configuration",
        )
    })
}

pub fn load_configuration() -> Result<(), Error> {
    if DIGEST_CONFIG.get().is_some() {
        return Ok(());
    }

    let config = DigestConfig::load()?;
    DIGEST_CONFIG.get_or_init(|| Arc::new(config));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    #[serial]
    fn test_load_config() {
        let config = DigestConfig::load().unwrap();

        assert_eq!(config.queue_url, "nats://127.0.0.1:4222");
        assert_eq!(config.output_format().unwrap(), DigestFormat::Csv);
        assert_eq!(config.schedule_period(), Duration::from_secs(300));
        assert_eq!(config.bucket_resource_id(), "notifications-digest");

        temp_env::with_var("SNSDIGEST_OUTPUT_FORMAT", Some("html"), || {
            let config = DigestConfig::load().unwrap();
            assert_eq!(config.output_format().unwrap(), DigestFormat::Html);
        });
    }

    #[test]
    #[serial]
    fn test_aggregator_settings() {
        temp_env::with_vars(
            [
                ("SNSDIGEST_INVOCATION_TIMEOUT_SECONDS", Some("120")),
                ("SNSDIGEST_COLLECTION_HEADROOM_SECONDS", Some("20")),
                ("SNSDIGEST_KEY_PREFIX", Some("out/")),
                ("SNSDIGEST_RETRY_ATTEMPTS", Some("5")),
            ],
            || {
                let settings = DigestConfig::load().unwrap().aggregator_settings().unwrap();
                assert_eq!(settings.collection_budget(), Duration::from_secs(100));
                assert_eq!(settings.key_prefix, "out/");
                assert_eq!(settings.retry.attempts, 5);
                assert_eq!(settings.poison_policy, PoisonPolicy::Delete);
            },
        );
    }

    #[test]
    #[serial]
    fn test_validation() {
        temp_env::with_var("SNSDIGEST_COLLECTION_HEADROOM_SECONDS", Some("600"), || {
            assert_err!(DigestConfig::load());
        });
        temp_env::with_var("SNSDIGEST_VISIBILITY_TIMEOUT_SECONDS", Some("600"), || {
            assert_err!(DigestConfig::load());
        });
        temp_env::with_vars(
            [
                ("SNSDIGEST_VISIBILITY_TIMEOUT_SECONDS", Some("120")),
                ("SNSDIGEST_INVOCATION_TIMEOUT_SECONDS", Some("90")),
            ],
            || {
                assert_ok!(DigestConfig::load());
            },
        );
        temp_env::with_var("SNSDIGEST_OUTPUT_FORMAT", Some("parquet"), || {
            assert_err!(DigestConfig::load());
        });
        temp_env::with_var("SNSDIGEST_MAX_BATCH_SIZE", Some("0"), || {
            assert_err!(DigestConfig::load());
        });
        temp_env::with_var("SNSDIGEST_POISON_POLICY", Some("dead-letter"), || {
            assert_err!(DigestConfig::load());
        });
        temp_env::with_vars(
            [
                ("SNSDIGEST_POISON_POLICY", Some("dead-letter")),
                ("SNSDIGEST_DEAD_LETTER_SUBJECT", Some("notifications.rejected")),
            ],
            || {
                assert_ok!(DigestConfig::load());
            },
        );
    }

    #[test]
    #[serial]
    fn test_load_configuration() {
        load_configuration().unwrap();
        assert!(DIGEST_CONFIG.get().is_some());

        let config = get().unwrap();
        assert_eq!(config.queue_name, "notifications");
    }
}
