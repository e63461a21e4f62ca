use crate::datamodel::NotificationRecord;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};

pub const MESSAGE_ID_COLUMN: &str = "MessageId";
pub const TIMESTAMP_COLUMN: &str = "Timestamp";
pub const TOPIC_COLUMN: &str = "TopicArn";

const RESERVED_COLUMNS: [&str; 3] = [MESSAGE_ID_COLUMN, TIMESTAMP_COLUMN, TOPIC_COLUMN];

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    MessageId,
    Timestamp,
    Topic,
    Payload(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub header: String,
    pub source: ColumnSource,
}

/// Column layout shared by every encoding: the reserved record columns,
/// then the sorted union of payload keys across the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSet {
    columns: Vec<Column>,
}

impl ColumnSet {
    pub fn from_records(records: &[NotificationRecord]) -> Self {
        let mut columns = vec![
            Column {
                header: MESSAGE_ID_COLUMN.to_string(),
                source: ColumnSource::MessageId,
            },
            Column {
                header: TIMESTAMP_COLUMN.to_string(),
                source: ColumnSource::Timestamp,
            },
            Column {
                header: TOPIC_COLUMN.to_string(),
                source: ColumnSource::Topic,
            },
        ];

        let keys: BTreeSet<&String> = records
            .iter()
            .flat_map(|record| record.payload.keys())
            .collect();

        let mut used: HashSet<String> = RESERVED_COLUMNS.iter().map(|c| c.to_string()).collect();
        used.extend(keys.iter().map(|k| k.to_string()));

        for key in keys {
            let header = if RESERVED_COLUMNS.contains(&key.as_str()) {
                let mut header = format!("payload.{}", key);
                while used.contains(&header) {
                    header = format!("payload.{}", header);
                }
                used.insert(header.clone());
                header
            } else {
                key.clone()
            };
            columns.push(Column {
                header,
                source: ColumnSource::Payload(key.clone()),
            });
        }

        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.header.as_str())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The value of `column` for `record`, `None` when the payload lacks the key.
    pub fn value(column: &Column, record: &NotificationRecord) -> Option<Value> {
        match &column.source {
            ColumnSource::MessageId => Some(Value::String(record.message_id.clone())),
            ColumnSource::Timestamp => Some(Value::String(record.timestamp.to_rfc3339())),
            ColumnSource::Topic => Some(Value::String(record.source_topic.clone())),
            ColumnSource::Payload(key) => record.payload.get(key).cloned(),
        }
    }

    /// Text of one cell for tabular encodings.
    pub fn cell(column: &Column, record: &NotificationRecord) -> String {
        Self::value(column, record)
            .map(|value| scalar_to_text(&value))
            .unwrap_or_default()
    }

    pub fn row(&self, record: &NotificationRecord) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| Self::cell(column, record))
            .collect()
    }
}

/// Strings verbatim, null as empty, nested values as compact JSON.
pub fn scalar_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
