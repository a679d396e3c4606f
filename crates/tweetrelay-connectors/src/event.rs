//! The canonical event published to the broker.
//!
//! Wire shape: `{"id", "userId", "text", "createdAt"}` with `createdAt`
//! formatted as [`PUBLISHED_TIMESTAMP_FORMAT`] (for example
//! `2024-04-08T12:34:56+0000`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SerdeError;

/// `createdAt` format of the published payload.
pub const PUBLISHED_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Canonical status timestamp, always rendered in UTC
/// (for example `Mon Apr 08 12:34:56 UTC 2024`).
pub const STATUS_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S UTC %Y";

/// Legacy status timestamp with a numeric offset
/// (for example `Mon Apr 08 12:34:56 +0000 2024`).
const STATUS_OFFSET_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// A normalized social-media event.
///
/// Built fresh for each ingested item and handed from stage to stage by
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalEvent {
    /// Upstream item id.
    pub id: String,
    /// Author id. Used as the record key.
    pub user_id: i64,
    /// Free text.
    pub text: String,
    /// Creation instant in UTC.
    #[serde(with = "published_timestamp")]
    pub created_at: DateTime<Utc>,
}

impl CanonicalEvent {
    /// Serializes the event to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns `SerdeError::Json` if encoding fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, SerdeError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Returns the record key: the author id as 8 big-endian bytes.
    #[must_use]
    pub fn key_bytes(&self) -> [u8; 8] {
        self.user_id.to_be_bytes()
    }
}

/// Renders an instant in the canonical status format.
#[must_use]
pub fn format_status_timestamp(instant: &DateTime<Utc>) -> String {
    instant.format(STATUS_TIMESTAMP_FORMAT).to_string()
}

/// Parses a status timestamp into UTC.
///
/// Accepts the canonical form with a `UTC` or `GMT` zone name as well as the
/// legacy form with a numeric offset.
///
/// # Errors
///
/// Returns `SerdeError::InvalidTimestamp` if the text matches neither form.
pub fn parse_status_timestamp(value: &str) -> Result<DateTime<Utc>, SerdeError> {
    let trimmed = value.trim();
    let mut parts: Vec<&str> = trimmed.split_whitespace().collect();
    if parts.len() == 6 && matches!(parts[4], "UTC" | "GMT" | "Z") {
        parts[4] = "+0000";
    }
    let normalized = parts.join(" ");

    DateTime::parse_from_str(&normalized, STATUS_OFFSET_FORMAT)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SerdeError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Parses a v2 API timestamp (RFC 3339, for example
/// `2024-04-08T12:34:56.000Z`) into UTC.
///
/// # Errors
///
/// Returns `SerdeError::InvalidTimestamp` on malformed input.
pub fn parse_v2_timestamp(value: &str) -> Result<DateTime<Utc>, SerdeError> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SerdeError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

mod published_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use super::PUBLISHED_TIMESTAMP_FORMAT;

    pub(super) fn serialize<S: Serializer>(
        value: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&value.format(PUBLISHED_TIMESTAMP_FORMAT))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_str(&text, PUBLISHED_TIMESTAMP_FORMAT)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

/// Builds a UTC instant from naive parts. Test helper for fixed timestamps.
#[cfg(test)]
pub(crate) fn utc(text: &str) -> DateTime<Utc> {
    chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S")
        .unwrap()
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalEvent {
        CanonicalEvent {
            id: "1777".into(),
            user_id: 42,
            text: "say \"hi\" to Kafka".into(),
            created_at: utc("2024-04-08 12:34:56"),
        }
    }

    #[test]
    fn test_wire_shape() {
        let json: serde_json::Value =
            serde_json::from_slice(&sample().to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["id"], "1777");
        assert_eq!(json["userId"], 42);
        assert_eq!(json["text"], "say \"hi\" to Kafka");
        assert_eq!(json["createdAt"], "2024-04-08T12:34:56+0000");
    }

    #[test]
    fn test_wire_roundtrip() {
        let bytes = sample().to_json_bytes().unwrap();
        let back: CanonicalEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_key_is_big_endian_long() {
        let event = CanonicalEvent {
            user_id: 0x0102_0304_0506_0708,
            ..sample()
        };
        assert_eq!(event.key_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_status_format() {
        let ts = utc("2024-04-08 12:34:56");
        assert_eq!(format_status_timestamp(&ts), "Mon Apr 08 12:34:56 UTC 2024");
    }

    #[test]
    fn test_parse_status_zone_name_and_offset() {
        let expected = utc("2024-04-08 12:34:56");
        assert_eq!(
            parse_status_timestamp("Mon Apr 08 12:34:56 UTC 2024").unwrap(),
            expected
        );
        assert_eq!(
            parse_status_timestamp("Mon Apr 08 12:34:56 +0000 2024").unwrap(),
            expected
        );
        assert_eq!(
            parse_status_timestamp("Mon Apr 08 14:34:56 +0200 2024").unwrap(),
            expected
        );
    }

    #[test]
    fn test_parse_status_rejects_garbage() {
        let err = parse_status_timestamp("yesterday at noon").unwrap_err();
        assert!(matches!(err, SerdeError::InvalidTimestamp { .. }));
        assert!(parse_status_timestamp("Mon Apr 08 12:34:56 PST 2024").is_err());
    }

    #[test]
    fn test_parse_v2_keeps_epoch_second() {
        let ts = parse_v2_timestamp("2024-04-08T12:34:56.000Z").unwrap();
        assert_eq!(ts.timestamp(), utc("2024-04-08 12:34:56").timestamp());
        assert!(parse_v2_timestamp("08/04/2024").is_err());
    }
}
