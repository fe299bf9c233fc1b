// crates/xgate-core/src/time.rs
// ============================================================================
// Module: Timestamps
// Description: UTC ISO-8601 timestamp helpers shared across the workspace.
// Purpose: One canonical timestamp type for event times, audit lines, and
//          explanation ordering proxies.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Unlike the teacher's replay-deterministic trigger model (which never
//! reads wall-clock time inside the core), this system's Event Log, Audit
//! Logger, and SLO Engine all need real UTC timestamps: events are ordered
//! by creation time, audit lines carry ISO-8601 timestamps, and the SLO
//! Engine runs on a wall-clock schedule. `Timestamp` wraps
//! [`time::OffsetDateTime`] and only ever serializes as RFC3339.

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::Serializer;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A UTC timestamp, serialized as an RFC3339 string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time in UTC.
    #[must_use]
    pub fn now_utc() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an existing [`OffsetDateTime`], converting it to UTC.
    #[must_use]
    pub fn from_offset(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    /// Returns the underlying `OffsetDateTime`.
    #[must_use]
    pub const fn as_offset(&self) -> OffsetDateTime {
        self.0
    }

    /// Parses an RFC3339 string (the spec's known field names for
    /// `timestamp` all resolve to this format or a bare date).
    ///
    /// # Errors
    ///
    /// Returns an error when `value` is neither a valid RFC3339 timestamp
    /// nor a bare `YYYY-MM-DD` date.
    pub fn parse(value: &str) -> Result<Self, time::error::Parse> {
        OffsetDateTime::parse(value, &Rfc3339).map(Self::from_offset).or_else(|err| {
            parse_date_only(value).ok_or(err)
        })
    }

    /// Renders this timestamp as an RFC3339 string.
    ///
    /// # Panics
    ///
    /// Panics only if the underlying formatter rejects a valid
    /// `OffsetDateTime`, which cannot happen for UTC-normalized values.
    #[must_use]
    pub fn to_rfc3339(&self) -> String {
        self.0.format(&Rfc3339).unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }

    /// Returns a new timestamp offset by the given number of whole seconds.
    #[must_use]
    pub fn plus_seconds(&self, seconds: i64) -> Self {
        Self(self.0 + time::Duration::seconds(seconds))
    }
}

fn parse_date_only(value: &str) -> Option<Timestamp> {
    let format = time::format_description::well_known::Iso8601::DATE;
    time::Date::parse(value, &format).ok().map(|date| {
        Timestamp::from_offset(date.with_hms(0, 0, 0).unwrap_or_else(|_| {
            time::PrimitiveDateTime::MIN
        }).assume_utc())
    })
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_rfc3339() {
        let now = Timestamp::now_utc();
        let text = now.to_rfc3339();
        let parsed = Timestamp::parse(&text).expect("parse");
        assert_eq!(parsed.to_rfc3339(), text);
    }

    #[test]
    fn parses_bare_date() {
        let parsed = Timestamp::parse("2026-07-28").expect("parse date-only");
        assert!(parsed.to_rfc3339().starts_with("2026-07-28"));
    }

    #[test]
    fn plus_seconds_is_monotone() {
        let base = Timestamp::now_utc();
        let later = base.plus_seconds(10);
        assert!(later > base);
    }
}
