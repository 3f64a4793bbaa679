use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Milliseconds since the Unix epoch.
///
/// Stored in the ledger as an RFC-3339 (ISO-8601) string per the `TEXT`
/// columns in the persisted schema; the millisecond-precision integer form
/// is used everywhere else (comparisons, elapsed-time arithmetic).
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
pub struct TimestampMs(i64);

impl TimestampMs {
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch");
        Self(duration.as_millis() as i64)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn as_unix_secs(self) -> i64 {
        self.0 / 1000
    }

    pub fn from_unix_secs(secs: i64) -> Self {
        Self(secs * 1000)
    }

    /// Renders this timestamp as an RFC-3339 string, e.g.
    /// `2026-08-01T00:00:00Z`, for storage in a `TEXT` column.
    pub fn to_rfc3339(self) -> String {
        let dt = OffsetDateTime::from_unix_timestamp(self.0 / 1000)
            .expect("millis since epoch is in OffsetDateTime's range")
            + time::Duration::milliseconds(self.0 % 1000);
        dt.format(&Rfc3339)
            .expect("RFC-3339 formatting is infallible for valid offsets")
    }

    pub fn from_rfc3339(s: &str) -> anyhow::Result<Self> {
        let dt = OffsetDateTime::parse(s, &Rfc3339)?;
        let millis = dt.unix_timestamp() as i64 * 1000
            + i64::from(dt.millisecond());
        Ok(Self(millis))
    }
}

impl From<i64> for TimestampMs {
    fn from(millis: i64) -> Self {
        Self(millis)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rfc3339_roundtrip() {
        let t = TimestampMs::from_millis(1_735_689_600_123);
        let s = t.to_rfc3339();
        let back = TimestampMs::from_rfc3339(&s).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn unix_secs_roundtrip() {
        let t = TimestampMs::from_unix_secs(1_735_689_600);
        assert_eq!(t.as_unix_secs(), 1_735_689_600);
    }

    #[test]
    fn now_is_monotonic_ish() {
        let a = TimestampMs::now();
        let b = TimestampMs::now();
        assert!(b >= a);
    }
}
