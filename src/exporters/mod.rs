pub mod columns;
pub mod csv;
pub mod html;
pub mod json;
pub mod jsonl;

pub use csv::CsvConverter;
pub use html::HtmlConverter;
pub use json::JsonConverter;
pub use jsonl::JsonlConverter;

use crate::datamodel::{Batch, DigestArtifact, DigestDateTime, DigestDateTimeExt, DigestFormat};
use crate::error::FormatError;
use bytes::Bytes;
use uuid::Uuid;

/// Renders a batch into the deployment's output format.
#[derive(Debug, Clone, Copy)]
pub struct DigestFormatter {
    format: DigestFormat,
}

impl DigestFormatter {
    pub fn new(format: DigestFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> DigestFormat {
        self.format
    }

    /// `<YYYYMMDD>T<HHMMSS><mmm>Z-<token>.<ext>`
    pub fn artifact_name(&self, generated_at: &DigestDateTime, token: Uuid) -> String {
        format!(
            "{}-{}.{}",
            generated_at.to_compact_utc(),
            token.simple(),
            self.format.extension()
        )
    }

    /// An empty batch still yields a well-formed artifact with no data rows.
    pub async fn render(
        &self,
        batch: &Batch,
        generated_at: &DigestDateTime,
        token: Uuid,
    ) -> Result<DigestArtifact, FormatError> {
        let records = batch.records();
        let body = match self.format {
            DigestFormat::Json => JsonConverter::to_json(records)?,
            DigestFormat::Jsonl => JsonlConverter::to_jsonl(records)?,
            DigestFormat::Csv => CsvConverter::to_csv(records).await?,
            DigestFormat::Html => {
                HtmlConverter::to_html(records, &generated_at.to_rfc3339()).into_bytes()
            }
        };

        Ok(DigestArtifact {
            name: self.artifact_name(generated_at, token),
            format: self.format,
            body: Bytes::from(body),
            record_count: batch.len(),
        })
    }
}
