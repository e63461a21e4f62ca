use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Output encoding of a digest artifact, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestFormat {
    Json,  // JSON array of records
    Jsonl, // JSON Lines (one record per line)
    Csv,   // Comma-separated values
    Html,  // Human-readable table
}

impl DigestFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestFormat::Json => "json",
            DigestFormat::Jsonl => "jsonl",
            DigestFormat::Csv => "csv",
            DigestFormat::Html => "html",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    /// Get the appropriate Content-Type header
    pub fn content_type(&self) -> &'static str {
        match self {
            DigestFormat::Json => "application/json",
            DigestFormat::Jsonl => "application/x-ndjson",
            DigestFormat::Csv => "text/csv",
            DigestFormat::Html => "text/html; charset=utf-8",
        }
    }
}

impl FromStr for DigestFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(DigestFormat::Json),
            "jsonl" | "ndjson" => Ok(DigestFormat::Jsonl),
            "csv" => Ok(DigestFormat::Csv),
            "html" | "htm" => Ok(DigestFormat::Html),
            other => Err(anyhow::anyhow!(
                "Unsupported output format '{}', expected one of json, jsonl, csv, html",
                other
            )),
        }
    }
}

impl fmt::Display for DigestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendered digest, ready to be persisted under `name`.
#[derive(Debug, Clone)]
pub struct DigestArtifact {
    pub name: String,
    pub format: DigestFormat,
    pub body: Bytes,
    pub record_count: usize,
}

impl DigestArtifact {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }
}

/// Durable reference to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactLocator {
    pub bucket: String,
    pub key: String,
    pub resource_id: String,
    pub uri: String,
}

impl fmt::Display for ArtifactLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

pub const DIGEST_SUBJECT: &str = "Digest summary";

/// The single message published to the output topic for one digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DigestNotification {
    pub subject: String,
    pub invocation_id: String,
    pub generated_at: String,
    pub format: DigestFormat,
    pub record_count: usize,
    pub rejected_count: usize,
    pub artifact: ArtifactLocator,
}
