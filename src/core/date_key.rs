use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const KEY_FORMAT: &str = "%Y-%m-%d";

/// A calendar day used as a bucket key and for every date comparison.
///
/// Always rendered as `YYYY-MM-DD`. Timestamps are truncated to their date
/// part on parse, so `2024-05-01T23:00:00Z` and `2024-05-01` are the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(NaiveDate);

impl DateKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn today() -> Self {
        Self(chrono::Local::now().date_naive())
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn succ(&self) -> Self {
        Self(self.0.succ_opt().unwrap_or(self.0))
    }

    pub fn pred(&self) -> Self {
        Self(self.0.pred_opt().unwrap_or(self.0))
    }

    /// Shift by `days`, saturating at the ends of the supported calendar.
    pub fn add_days(&self, days: i64) -> Self {
        let step = Days::new(days.unsigned_abs());
        let shifted = if days >= 0 {
            self.0.checked_add_days(step).unwrap_or(NaiveDate::MAX)
        } else {
            self.0.checked_sub_days(step).unwrap_or(NaiveDate::MIN)
        };
        Self(shifted)
    }

    /// Parse a date or timestamp string into a key.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(d) = NaiveDate::parse_from_str(s, KEY_FORMAT) {
            return Some(Self(d));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Self(dt.date_naive()));
        }
        // Anything else with a time part: keep what precedes the `T` or space
        let date_part = s.split(['T', ' ']).next()?;
        NaiveDate::parse_from_str(date_part, KEY_FORMAT).ok().map(Self)
    }
}

impl From<NaiveDate> for DateKey {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for DateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(KEY_FORMAT))
    }
}

impl FromStr for DateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid date: {}", s))
    }
}

impl Serialize for DateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_days_saturates_instead_of_overflowing() {
        let key = DateKey::parse("2024-05-01").unwrap();
        assert_eq!(key.add_days(-1).to_string(), "2024-04-30");
        assert_eq!(key.add_days(4_000_000_000).date(), NaiveDate::MAX);
        assert_eq!(key.add_days(-4_000_000_000).date(), NaiveDate::MIN);
    }

    #[test]
    fn parses_plain_dates() {
        let key = DateKey::parse("2024-05-01").unwrap();
        assert_eq!(key, DateKey::from_ymd(2024, 5, 1).unwrap());
        assert_eq!(key.to_string(), "2024-05-01");
    }

    #[test]
    fn truncates_timestamps() {
        let expected = DateKey::from_ymd(2024, 5, 1).unwrap();
        assert_eq!(DateKey::parse("2024-05-01T12:00:00+00:00"), Some(expected));
        assert_eq!(DateKey::parse("2024-05-01T12:00:00.000Z"), Some(expected));
        assert_eq!(DateKey::parse("2024-05-01T08:30:00"), Some(expected));
        assert_eq!(DateKey::parse("2024-05-01 08:30:00"), Some(expected));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(DateKey::parse("tomorrow"), None);
        assert_eq!(DateKey::parse(""), None);
        assert_eq!(DateKey::parse("2024-13-01"), None);
    }

    #[test]
    fn serde_uses_key_form() {
        let key = DateKey::from_ymd(2024, 5, 2).unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"2024-05-02\"");
        let back: DateKey = serde_json::from_str("\"2024-05-02T00:00:00Z\"").unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn keys_order_chronologically() {
        let a = DateKey::parse("2024-04-30").unwrap();
        let b = DateKey::parse("2024-05-01").unwrap();
        assert!(a < b);
        assert_eq!(a.succ(), b);
        assert_eq!(b.pred(), a);
    }
}
