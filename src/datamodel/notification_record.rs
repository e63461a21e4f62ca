use super::DigestDateTime;
use serde_json::{Map, Value};
use std::fmt;

/// Decoded payload of a notification. Keys are sorted, which keeps every
/// rendering of the same batch byte-identical.
pub type Payload = Map<String, Value>;

/// One notification forwarded from the source topic, immutable once decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRecord {
    pub message_id: String,
    pub timestamp: DigestDateTime,
    pub source_topic: String,
    pub subject: Option<String>,
    pub payload: Payload,
}

impl NotificationRecord {
    pub fn new(
        message_id: String,
        timestamp: DigestDateTime,
        source_topic: String,
        subject: Option<String>,
        payload: Payload,
    ) -> Self {
        Self {
            message_id,
            timestamp,
            source_topic,
            subject,
            payload,
        }
    }
}

impl fmt::Display for NotificationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NotificationRecord {{ message_id: {}, topic: {}, keys: {} }}",
            self.message_id,
            self.source_topic,
            self.payload.len()
        )
    }
}
