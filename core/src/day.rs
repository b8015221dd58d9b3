use std::ops::{Add, Sub};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Days between the Unix epoch and day number zero.
///
/// Persisted allocations use this Julian-day-like scheme, so it must not
/// change: `day = floor(unix_seconds / 86400) + 2440587`.
pub const JULIAN_DAY_OFFSET: i64 = 2_440_587;

const SECONDS_PER_DAY: i64 = 86_400;

/// Trailing window of allocation history kept loaded, in days.
pub const MAX_RETENTION_DAYS: i64 = 366;

/// Integer day count from a fixed epoch — the primary calendar key.
///
/// Being a plain integer makes "N days from today" and distance
/// calculations simple arithmetic.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct DayNumber(pub i64);

impl DayNumber {
    #[must_use]
    pub fn from_unix_seconds(seconds: i64) -> Self {
        DayNumber(seconds.div_euclid(SECONDS_PER_DAY) + JULIAN_DAY_OFFSET)
    }

    #[must_use]
    pub fn from_date(date: NaiveDate) -> Self {
        Self::from_unix_seconds(date.and_time(NaiveTime::MIN).and_utc().timestamp())
    }

    #[must_use]
    pub fn today() -> Self {
        Self::from_unix_seconds(Utc::now().timestamp())
    }

    #[must_use]
    pub fn value(self) -> i64 {
        self.0
    }

    /// Absolute distance in days.
    #[must_use]
    pub fn distance(self, other: DayNumber) -> i64 {
        (self.0 - other.0).abs()
    }

    /// The calendar date this day number falls on, if representable.
    #[must_use]
    pub fn to_date(self) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp((self.0 - JULIAN_DAY_OFFSET) * SECONDS_PER_DAY, 0)
            .map(|dt| dt.date_naive())
    }
}

impl Add<i64> for DayNumber {
    type Output = DayNumber;

    fn add(self, days: i64) -> DayNumber {
        DayNumber(self.0 + days)
    }
}

impl Sub<i64> for DayNumber {
    type Output = DayNumber;

    fn sub(self, days: i64) -> DayNumber {
        DayNumber(self.0 - days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_is_julian_offset() {
        assert_eq!(DayNumber::from_unix_seconds(0).value(), JULIAN_DAY_OFFSET);
        // Any second within the first day maps to the same day number.
        assert_eq!(
            DayNumber::from_unix_seconds(SECONDS_PER_DAY - 1).value(),
            JULIAN_DAY_OFFSET
        );
        assert_eq!(
            DayNumber::from_unix_seconds(SECONDS_PER_DAY).value(),
            JULIAN_DAY_OFFSET + 1
        );
    }

    #[test]
    fn test_pre_epoch_rounds_down() {
        assert_eq!(
            DayNumber::from_unix_seconds(-1).value(),
            JULIAN_DAY_OFFSET - 1
        );
    }

    #[test]
    fn test_known_date() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(DayNumber::from_date(date).value(), 2_460_476);
    }

    #[test]
    fn test_date_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2030, 12, 31).unwrap();
        let day = DayNumber::from_date(date);
        assert_eq!(day.to_date(), Some(date));
    }

    #[test]
    fn test_arithmetic_and_distance() {
        let day = DayNumber(2_460_476);
        assert_eq!((day + 10).value(), 2_460_486);
        assert_eq!((day - 366).value(), 2_460_110);
        assert_eq!(day.distance(day + 10), 10);
        assert_eq!(day.distance(day - 10), 10);
        assert!(day < day + 1);
    }
}
