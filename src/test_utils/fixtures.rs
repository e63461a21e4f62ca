use serde_json::{Value, json};

pub const TEST_TOPIC_ARN: &str = "arn:aws:sns:eu-west-1:123456789012:orders";

/// A topic notification forwarded to the queue, with a plain text message.
pub fn notification_envelope(message_id: &str, message: &str) -> Vec<u8> {
    json!({
        "Type": "Notification",
        "MessageId": message_id,
        "TopicArn": TEST_TOPIC_ARN,
        "Subject": "Order update",
        "Message": message,
        "Timestamp": "2024-01-15T10:30:00.123Z",
        "SignatureVersion": "1"
    })
    .to_string()
    .into_bytes()
}

/// A forwarded notification whose message is a JSON document.
pub fn json_notification_envelope(message_id: &str, payload: Value) -> Vec<u8> {
    notification_envelope(message_id, &payload.to_string())
}

pub fn malformed_envelope() -> Vec<u8> {
    b"{\"MessageId\": \"broken\", \"Message\": ".to_vec()
}

/// Well-formed JSON that is not a forwarded notification.
pub fn envelope_missing_fields() -> Vec<u8> {
    json!({"hello": "world"}).to_string().into_bytes()
}
