use std::time::Duration;
use thiserror::Error;

/// A single envelope could not be turned into a notification record.
/// Never fatal: the delivery is excluded from the batch.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Envelope is not valid UTF-8 JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Envelope is not a JSON object")]
    NotAnObject,

    #[error("Envelope is missing required field {field}")]
    MissingField { field: &'static str },

    #[error("Envelope field {field} has an invalid value: {details}")]
    InvalidField {
        field: &'static str,
        details: String,
    },

    #[error("Unsupported envelope type: {0}")]
    UnsupportedType(String),
}

impl DecodeError {
    pub fn invalid_field(field: &'static str, details: impl Into<String>) -> Self {
        DecodeError::InvalidField {
            field,
            details: details.into(),
        }
    }
}

/// Polling the queue failed beyond the retry budget.
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("Queue poll failed after {attempts} attempts: {source}")]
    Poll {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("CSV rendering failed: {0}")]
    Csv(#[from] csv_async::Error),

    #[error("JSON rendering failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error while rendering: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rendered output is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("Artifact key {key} already exists in bucket {bucket}")]
    KeyCollision { bucket: String, key: String },

    #[error("Failed to write artifact {key} after {attempts} attempts: {source}")]
    Write {
        key: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to encode digest notification: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to publish digest notification after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

/// Reason an invocation ended in the `Failed` state. Nothing has been
/// acknowledged when one of these is returned.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("Collection failed: {0}")]
    Collection(#[from] CollectionError),

    #[error("Formatting failed: {0}")]
    Format(#[from] FormatError),

    #[error("Persisting the digest failed: {0}")]
    Persist(#[from] PersistError),

    #[error("Publishing the digest failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Invocation exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("Invalid invocation state transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    #[error("Invocation could not start: {0}")]
    Setup(#[source] anyhow::Error),
}
