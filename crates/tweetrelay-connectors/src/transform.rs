//! Raw payload to [`CanonicalEvent`] transformation.
//!
//! Two wire formats arrive from the sources:
//!
//! - **Status**: a legacy status object,
//!   `{"created_at": "Mon Apr 08 12:34:56 +0000 2024", "id": .., "text": ..,
//!   "user": {"id": ..}}`. Produced by the synthetic generator and the
//!   filtered stream.
//! - **V2**: a line from the rule-based stream,
//!   `{"data": {"created_at": "2024-04-08T12:34:56.000Z", "id": .., "text": ..,
//!   "author_id": ..}}`. It is first rewritten into a status object whose
//!   `created_at` uses the canonical UTC status format.
//!
//! Both paths parse through a `serde_json::Value` tree, so embedded quotes
//! in free text are escaped by the encoder rather than spliced by hand.

use serde_json::{json, Map, Value};

use crate::error::SerdeError;
use crate::event::{
    format_status_timestamp, parse_status_timestamp, parse_v2_timestamp, CanonicalEvent,
};
use crate::source::SourceKind;

/// Wire format of a raw payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Legacy status object.
    Status,
    /// Rule-based stream line wrapping a `data` object.
    V2,
}

/// One raw item emitted by an ingestion source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload {
    /// The source that produced the item.
    pub source: SourceKind,
    /// Raw JSON text.
    pub body: String,
}

impl RawPayload {
    /// Creates a raw payload.
    #[must_use]
    pub fn new(source: SourceKind, body: impl Into<String>) -> Self {
        Self {
            source,
            body: body.into(),
        }
    }

    /// Returns the wire format implied by the producing source.
    #[must_use]
    pub fn format(&self) -> PayloadFormat {
        self.source.payload_format()
    }
}

/// Maps raw payloads to canonical events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTransformer;

impl EventTransformer {
    /// Creates a transformer.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Transforms a raw payload into a canonical event.
    ///
    /// # Errors
    ///
    /// Returns a [`SerdeError`] for malformed JSON, missing fields or
    /// unparseable timestamps. The caller drops the item.
    pub fn transform(&self, raw: &RawPayload) -> Result<CanonicalEvent, SerdeError> {
        match raw.format() {
            PayloadFormat::Status => {
                let status: Value = serde_json::from_str(&raw.body)?;
                Self::from_status(&status)
            }
            PayloadFormat::V2 => {
                let status = Self::v2_to_status(&raw.body)?;
                Self::from_status(&status)
            }
        }
    }

    /// Rewrites a rule-based stream line into a status object.
    ///
    /// `created_at` is normalized to UTC and rendered in the canonical
    /// status format.
    ///
    /// # Errors
    ///
    /// Returns a [`SerdeError`] if the line is not JSON, lacks the `data`
    /// object or one of its fields, or carries an invalid timestamp.
    pub fn v2_to_status(line: &str) -> Result<Value, SerdeError> {
        let root: Value = serde_json::from_str(line)?;
        let data = root
            .get("data")
            .and_then(Value::as_object)
            .ok_or_else(|| SerdeError::MissingField("data".into()))?;

        let created_at = parse_v2_timestamp(require_str(data, "created_at")?)?;
        let id = require_id(data, "id")?;
        let text = require_str(data, "text")?;
        let author_id = require_id(data, "author_id")?;

        Ok(json!({
            "created_at": format_status_timestamp(&created_at),
            "id": id,
            "text": text,
            "user": { "id": author_id },
        }))
    }

    fn from_status(status: &Value) -> Result<CanonicalEvent, SerdeError> {
        let obj = status
            .as_object()
            .ok_or_else(|| SerdeError::MalformedInput("status is not a JSON object".into()))?;

        let created_at = parse_status_timestamp(require_str(obj, "created_at")?)?;
        let id = require_id(obj, "id")?;
        let text = require_str(obj, "text")?.to_string();
        let user = obj
            .get("user")
            .and_then(Value::as_object)
            .ok_or_else(|| SerdeError::MissingField("user".into()))?;
        let user_id = require_id(user, "id")?;
        let user_id = user_id.parse::<i64>().map_err(|e| {
            SerdeError::MalformedInput(format!("user.id '{user_id}' is not a 64-bit integer: {e}"))
        })?;

        Ok(CanonicalEvent {
            id,
            user_id,
            text,
            created_at,
        })
    }
}

fn require_str<'a>(obj: &'a Map<String, Value>, field: &str) -> Result<&'a str, SerdeError> {
    obj.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| SerdeError::MissingField(field.to_string()))
}

/// Ids arrive either as JSON strings or as JSON integers.
fn require_id(obj: &Map<String, Value>, field: &str) -> Result<String, SerdeError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        Some(other) => Err(SerdeError::MalformedInput(format!(
            "field '{field}' is not an id: {other}"
        ))),
        None => Err(SerdeError::MissingField(field.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::utc;

    fn v2_line(created_at: &str, text: &str) -> String {
        json!({
            "data": {
                "created_at": created_at,
                "id": "1778000000000000000",
                "text": text,
                "author_id": "2244994945"
            }
        })
        .to_string()
    }

    #[test]
    fn test_v2_timestamp_keeps_instant() {
        let raw = RawPayload::new(
            SourceKind::RuleBasedPollStream,
            v2_line("2024-04-08T12:34:56.000Z", "hello"),
        );
        let event = EventTransformer::new().transform(&raw).unwrap();
        assert_eq!(
            event.created_at.timestamp(),
            utc("2024-04-08 12:34:56").timestamp()
        );
        assert_eq!(event.id, "1778000000000000000");
        assert_eq!(event.user_id, 2_244_994_945);
    }

    #[test]
    fn test_v2_to_status_uses_canonical_format() {
        let status =
            EventTransformer::v2_to_status(&v2_line("2024-04-08T14:34:56+02:00", "x")).unwrap();
        assert_eq!(status["created_at"], "Mon Apr 08 12:34:56 UTC 2024");
        assert_eq!(status["user"]["id"], "2244994945");
    }

    #[test]
    fn test_quotes_survive_intermediate_json() {
        let text = r#"she said "stream it" \o/"#;
        let raw = RawPayload::new(
            SourceKind::RuleBasedPollStream,
            v2_line("2024-04-08T12:34:56.000Z", text),
        );
        let event = EventTransformer::new().transform(&raw).unwrap();
        assert_eq!(event.text, text);
    }

    #[test]
    fn test_status_with_offset_and_numeric_ids() {
        let body = r#"{
            "created_at": "Mon Apr 08 12:34:56 +0000 2024",
            "id": 1850006156,
            "text": "Kafka rocks",
            "user": {"id": 6253282}
        }"#;
        let raw = RawPayload::new(SourceKind::FilteredStream, body);
        let event = EventTransformer::new().transform(&raw).unwrap();
        assert_eq!(event.id, "1850006156");
        assert_eq!(event.user_id, 6_253_282);
        assert_eq!(event.created_at, utc("2024-04-08 12:34:56"));
    }

    #[test]
    fn test_status_with_zone_name() {
        let body = r#"{"created_at": "Mon Apr 08 12:34:56 UTC 2024",
            "id": "7", "text": "t", "user": {"id": "9"}}"#;
        let raw = RawPayload::new(SourceKind::Synthetic, body);
        let event = EventTransformer::new().transform(&raw).unwrap();
        assert_eq!(event.user_id, 9);
    }

    #[test]
    fn test_missing_fields_are_errors() {
        let t = EventTransformer::new();

        let raw = RawPayload::new(SourceKind::RuleBasedPollStream, r#"{"meta": {}}"#);
        assert!(matches!(
            t.transform(&raw),
            Err(SerdeError::MissingField(f)) if f == "data"
        ));

        let raw = RawPayload::new(
            SourceKind::RuleBasedPollStream,
            r#"{"data": {"created_at": "2024-04-08T12:34:56.000Z", "id": "1", "text": "t"}}"#,
        );
        assert!(matches!(
            t.transform(&raw),
            Err(SerdeError::MissingField(f)) if f == "author_id"
        ));

        let raw = RawPayload::new(
            SourceKind::FilteredStream,
            r#"{"created_at": "Mon Apr 08 12:34:56 UTC 2024", "id": "1", "text": "t"}"#,
        );
        assert!(matches!(
            t.transform(&raw),
            Err(SerdeError::MissingField(f)) if f == "user"
        ));
    }

    #[test]
    fn test_malformed_inputs_are_errors() {
        let t = EventTransformer::new();

        let raw = RawPayload::new(SourceKind::RuleBasedPollStream, "not json");
        assert!(matches!(t.transform(&raw), Err(SerdeError::Json(_))));

        let raw = RawPayload::new(
            SourceKind::RuleBasedPollStream,
            v2_line("last tuesday", "t"),
        );
        assert!(matches!(
            t.transform(&raw),
            Err(SerdeError::InvalidTimestamp { .. })
        ));

        let raw = RawPayload::new(
            SourceKind::FilteredStream,
            r#"{"created_at": "Mon Apr 08 12:34:56 UTC 2024", "id": "1",
                "text": "t", "user": {"id": "not-a-number"}}"#,
        );
        assert!(matches!(
            t.transform(&raw),
            Err(SerdeError::MalformedInput(_))
        ));
    }
}
