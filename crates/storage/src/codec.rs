#![forbid(unsafe_code)]

//! Serde field adapters for core types and millisecond timestamps stored as RFC 3339 text.

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub fn ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

pub fn rfc3339_to_ms(raw: &str) -> Option<i64> {
    let dt = OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()?;
    let ms = dt.unix_timestamp_nanos() / 1_000_000i128;
    i64::try_from(ms).ok()
}

/// RFC 3339 on write; RFC 3339 or integer milliseconds on read.
pub mod timestamp {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Millis(i64),
    }

    pub fn serialize<S: Serializer>(ts_ms: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::ms_to_rfc3339(*ts_ms))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(ms),
            Raw::Text(text) => super::rfc3339_to_ms(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {text}"))),
        }
    }
}

pub mod status {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use sw_core::Status;

    pub fn serialize<S: Serializer>(status: &Status, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(status.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Status, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Status::parse(&raw).ok_or_else(|| D::Error::custom(format!("unknown status: {raw}")))
    }
}

pub mod increment_type {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use sw_core::model::IncrementType;

    pub fn serialize<S: Serializer>(
        kind: &IncrementType,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(kind.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<IncrementType, D::Error> {
        let raw = String::deserialize(deserializer)?;
        IncrementType::parse(&raw)
            .ok_or_else(|| D::Error::custom(format!("unknown increment type: {raw}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc3339_round_trip_keeps_millis() {
        let ms = 1_731_580_800_123;
        let text = ms_to_rfc3339(ms);
        assert!(text.starts_with("2024-11-14T10:40:00.123"), "{text}");
        assert_eq!(rfc3339_to_ms(&text), Some(ms));
        assert_eq!(rfc3339_to_ms("not a date"), None);
    }
}
