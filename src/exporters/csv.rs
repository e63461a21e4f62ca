use super::columns::ColumnSet;
use crate::datamodel::NotificationRecord;
use crate::error::FormatError;
use csv_async::AsyncWriter;

/// Converter for a batch to CSV format
pub struct CsvConverter;

impl CsvConverter {
    /// Header row first, always, then one row per record. Quoting of commas,
    /// quotes and newlines is left to the CSV writer.
    pub async fn to_csv(records: &[NotificationRecord]) -> Result<Vec<u8>, FormatError> {
        let columns = ColumnSet::from_records(records);
        let mut writer = AsyncWriter::from_writer(Vec::new());

        writer.write_record(columns.headers()).await?;
        for record in records {
            writer.write_record(columns.row(record)).await?;
        }
        writer.flush().await?;

        writer
            .into_inner()
            .await
            .map_err(|e| FormatError::Io(std::io::Error::other(e.to_string())))
    }
}
