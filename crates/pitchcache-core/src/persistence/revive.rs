//! Timestamp revival for persisted records and network payloads.
//!
//! Instants are stored on disk (and arrive over the wire) as strings. Every
//! conversion back into `DateTime<Utc>` goes through `revive_timestamp`, so
//! the accepted formats are defined in exactly one place:
//!
//! - RFC 3339 (`2024-05-01T10:00:00Z`, `2024-05-01T12:00:00+02:00`)
//! - naive ISO-8601 without offset, read as UTC (`2024-05-01T10:00:00.123456`)
//! - integer epoch milliseconds (`1714557600000`)

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

/// Format used when encoding instants for storage.
pub fn encode_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// Parse a stored or server-reported instant. Returns `None` for anything
/// that cannot be read as a point in time.
pub fn revive_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    if let Ok(millis) = raw.parse::<i64>() {
        return Utc.timestamp_millis_opt(millis).single();
    }

    debug!(value = raw, "Unparseable timestamp, treating as absent");
    None
}

/// Revive an optional stored field.
pub fn revive_opt(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(revive_timestamp)
}

/// Serde adapter for `Option<DateTime<Utc>>` fields.
///
/// Serializes as RFC 3339; deserializes anything `revive_timestamp` accepts,
/// including bare integers for epoch milliseconds.
pub mod opt {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawInstant {
        Text(String),
        Millis(i64),
    }

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&super::encode_timestamp(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<RawInstant> = Option::deserialize(deserializer)?;
        Ok(match raw {
            Some(RawInstant::Text(s)) => super::revive_timestamp(&s),
            Some(RawInstant::Millis(ms)) => Utc.timestamp_millis_opt(ms).single(),
            None => None,
        })
    }
}
