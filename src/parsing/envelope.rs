use crate::datamodel::{DigestDateTime, DigestDateTimeExt, NotificationRecord, Payload};
use crate::error::DecodeError;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Payload key used when the forwarded message is not a JSON object.
pub const MESSAGE_KEY: &str = "Message";
pub const SUBJECT_KEY: &str = "Subject";
pub const ATTRIBUTE_PREFIX: &str = "attr.";

const NOTIFICATION_TYPE: &str = "Notification";

/// A topic notification forwarded into the queue, as found in the delivery body.
#[derive(Debug, Deserialize)]
struct ForwardedNotification {
    #[serde(rename = "Type")]
    kind: Option<String>,
    #[serde(rename = "MessageId")]
    message_id: Option<String>,
    #[serde(rename = "TopicArn")]
    topic_arn: Option<String>,
    #[serde(rename = "Subject")]
    subject: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
    #[serde(rename = "Timestamp")]
    timestamp: Option<String>,
    #[serde(rename = "MessageAttributes")]
    message_attributes: Option<Map<String, Value>>,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, DecodeError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(DecodeError::MissingField { field }),
    }
}

/// Attribute values are usually `{"Type": "String", "Value": "..."}`; only the
/// value is kept.
fn attribute_value(value: Value) -> Value {
    match value {
        Value::Object(mut object) => match object.remove("Value") {
            Some(inner) => inner,
            None => Value::Object(object),
        },
        other => other,
    }
}

fn build_payload(
    message: String,
    subject: Option<&String>,
    attributes: Option<Map<String, Value>>,
) -> Payload {
    let mut payload = match serde_json::from_str::<Value>(&message) {
        Ok(Value::Object(object)) => object,
        _ => {
            let mut payload = Payload::new();
            payload.insert(MESSAGE_KEY.to_string(), Value::String(message));
            payload
        }
    };

    if let Some(subject) = subject {
        payload
            .entry(SUBJECT_KEY.to_string())
            .or_insert_with(|| Value::String(subject.clone()));
    }

    for (name, value) in attributes.into_iter().flatten() {
        payload.insert(format!("{}{}", ATTRIBUTE_PREFIX, name), attribute_value(value));
    }

    payload
}

/// Decode one raw envelope into a [`NotificationRecord`].
pub fn decode_envelope(envelope: &[u8]) -> Result<NotificationRecord, DecodeError> {
    let value: Value = serde_json::from_slice(envelope)?;
    if !value.is_object() {
        return Err(DecodeError::NotAnObject);
    }
    let notification: ForwardedNotification = serde_json::from_value(value)?;

    if let Some(kind) = &notification.kind {
        if kind != NOTIFICATION_TYPE {
            return Err(DecodeError::UnsupportedType(kind.clone()));
        }
    }

    let message_id = required(notification.message_id, "MessageId")?;
    let source_topic = required(notification.topic_arn, "TopicArn")?;
    let timestamp = required(notification.timestamp, "Timestamp")?;
    let message = notification
        .message
        .ok_or(DecodeError::MissingField { field: "Message" })?;

    let timestamp = DigestDateTime::parse_rfc3339(&timestamp)
        .map_err(|e| DecodeError::invalid_field("Timestamp", e.to_string()))?;

    let subject = notification.subject.filter(|s| !s.is_empty());
    let payload = build_payload(message, subject.as_ref(), notification.message_attributes);

    Ok(NotificationRecord::new(
        message_id,
        timestamp,
        source_topic,
        subject,
        payload,
    ))
}
