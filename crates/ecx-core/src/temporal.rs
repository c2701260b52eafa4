//! # Temporal Types
//!
//! UTC-only timestamp type for the escrow stack. All timestamps are stored
//! in UTC and serialize to ISO 8601 with a `Z` suffix.
//!
//! Closings span parties in different time zones; deadlines, audit events,
//! and state transitions are ambiguous unless every stored instant is UTC.
//! Local time conversion is a presentation concern outside this workspace.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A UTC timestamp.
///
/// Serializes to ISO 8601 with `Z` suffix (e.g., `2026-03-02T12:00:00Z`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current UTC time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create a timestamp from a `chrono::DateTime<Utc>`.
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Access the underlying `chrono::DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The timestamp offset forward by `offset`.
    pub fn plus(&self, offset: Duration) -> Self {
        Self(self.0 + offset)
    }

    /// Signed duration from `earlier` to `self`.
    pub fn since(&self, earlier: Timestamp) -> Duration {
        self.0 - earlier.0
    }

    /// ISO 8601 string with Z suffix, truncated to seconds.
    pub fn to_canonical_string(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_string_is_utc_seconds() {
        let dt = DateTime::parse_from_rfc3339("2026-03-02T12:00:00.750Z")
            .expect("parse")
            .with_timezone(&Utc);
        assert_eq!(
            Timestamp::from_datetime(dt).to_canonical_string(),
            "2026-03-02T12:00:00Z"
        );
    }

    #[test]
    fn plus_and_since_are_inverse() {
        let base = Timestamp::now();
        let later = base.plus(Duration::days(5));
        assert_eq!(later.since(base), Duration::days(5));
        assert!(later > base);
    }
}
