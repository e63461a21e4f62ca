use super::columns::ColumnSet;
use crate::datamodel::NotificationRecord;
use crate::error::FormatError;
use serde_json::{Map, Value};

/// One record as a JSON object keyed by column header. Absent payload keys
/// are left out rather than rendered as null.
pub fn record_to_object(columns: &ColumnSet, record: &NotificationRecord) -> Map<String, Value> {
    columns
        .columns()
        .iter()
        .filter_map(|column| {
            ColumnSet::value(column, record).map(|value| (column.header.clone(), value))
        })
        .collect()
}

/// Converter for a batch to a JSON array
pub struct JsonConverter;

impl JsonConverter {
    pub fn to_json(records: &[NotificationRecord]) -> Result<Vec<u8>, FormatError> {
        let columns = ColumnSet::from_records(records);
        let objects: Vec<Value> = records
            .iter()
            .map(|record| Value::Object(record_to_object(&columns, record)))
            .collect();
        let mut output = serde_json::to_vec_pretty(&objects)?;
        output.push(b'\n');
        Ok(output)
    }
}
