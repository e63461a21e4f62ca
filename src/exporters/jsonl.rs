use super::columns::ColumnSet;
use super::json::record_to_object;
use crate::datamodel::NotificationRecord;
use crate::error::FormatError;
use serde_json::Value;

/// Converter for a batch to JSON Lines format (one JSON object per line)
pub struct JsonlConverter;

impl JsonlConverter {
    pub fn to_jsonl(records: &[NotificationRecord]) -> Result<Vec<u8>, FormatError> {
        let columns = ColumnSet::from_records(records);
        let mut jsonl_output = Vec::new();

        for record in records {
            let line = Value::Object(record_to_object(&columns, record));
            serde_json::to_writer(&mut jsonl_output, &line)?;
            jsonl_output.push(b'\n');
        }

        Ok(jsonl_output)
    }
}
