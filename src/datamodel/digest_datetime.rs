pub type DigestDateTime = hifitime::Epoch;
use anyhow::{Result, anyhow};

pub trait DigestDateTimeExt: Sized {
    fn now_utc() -> Result<Self>;
    fn parse_rfc3339(value: &str) -> Result<Self>;
    fn to_compact_utc(&self) -> String;
}

impl DigestDateTimeExt for DigestDateTime {
    fn now_utc() -> Result<Self> {
        Self::now().map_err(|e| anyhow!("Failed to read the system clock: {}", e))
    }

    /// Parse an ISO8601/RFC3339 timestamp such as `2024-01-15T10:30:00.123Z`.
    fn parse_rfc3339(value: &str) -> Result<Self> {
        Self::from_gregorian_str(value)
            .map_err(|e| anyhow!("Invalid datetime format '{}': {}", value, e))
    }

    /// Millisecond precision UTC stamp usable in object keys: `20240115T103000123Z`.
    fn to_compact_utc(&self) -> String {
        let (year, month, day, hour, minute, second, nanos) = self.to_gregorian_utc();
        format!(
            "{:04}{:02}{:02}T{:02}{:02}{:02}{:03}Z",
            year,
            month,
            day,
            hour,
            minute,
            second,
            nanos / 1_000_000
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_send() {
        assert_send::<DigestDateTime>();
    }

    #[test]
    fn test_parse_sns_timestamp() {
        let datetime = DigestDateTime::parse_rfc3339("2021-02-16T21:41:19.978Z").unwrap();
        assert_eq!(datetime.to_unix_milliseconds().round() as i64, 1613511679978);
    }

    #[test]
    fn test_parse_invalid_timestamp() {
        assert!(DigestDateTime::parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn test_compact_utc() {
        let datetime = DigestDateTime::parse_rfc3339("2024-01-15T10:30:00.123Z").unwrap();
        assert_eq!(datetime.to_compact_utc(), "20240115T103000123Z");
    }
}
