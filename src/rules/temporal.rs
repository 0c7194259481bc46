//! Timestamps and relative spans used by temporal conditions.

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parse an absolute instant. Values without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanUnit {
    Hours,
    Days,
    Weeks,
    Months,
}

impl SpanUnit {
    fn parse(word: &str) -> Option<Self> {
        match word {
            "hour" | "hours" => Some(Self::Hours),
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            "month" | "months" => Some(Self::Months),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum SpanError {
    #[error("expected '<N> <unit>'")]
    Malformed,

    #[error("'{0}' is not a non-negative whole number")]
    BadMagnitude(String),

    #[error("unknown unit '{0}', expected hours, days, weeks or months")]
    UnknownUnit(String),
}

/// A span such as `30 days` or `2 months`.
///
/// Month spans are calendar months: subtracting one month from March 31st
/// lands on the last day of February.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelativeSpan {
    pub amount: u32,
    pub unit: SpanUnit,
}

impl FromStr for RelativeSpan {
    type Err = SpanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let (Some(magnitude), Some(unit), None) = (words.next(), words.next(), words.next())
        else {
            return Err(SpanError::Malformed);
        };

        if !magnitude.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SpanError::BadMagnitude(magnitude.to_string()));
        }
        let amount = magnitude
            .parse::<u32>()
            .map_err(|_| SpanError::BadMagnitude(magnitude.to_string()))?;
        let unit = SpanUnit::parse(unit).ok_or_else(|| SpanError::UnknownUnit(unit.to_string()))?;

        Ok(Self { amount, unit })
    }
}

impl RelativeSpan {
    /// The instant lying this span before `reference`.
    pub fn before(&self, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let amount = i64::from(self.amount);
        match self.unit {
            SpanUnit::Hours => reference.checked_sub_signed(Duration::try_hours(amount)?),
            SpanUnit::Days => reference.checked_sub_signed(Duration::try_days(amount)?),
            SpanUnit::Weeks => reference.checked_sub_signed(Duration::try_weeks(amount)?),
            SpanUnit::Months => reference.checked_sub_months(Months::new(self.amount)),
        }
    }
}

impl fmt::Display for RelativeSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            SpanUnit::Hours => "hours",
            SpanUnit::Days => "days",
            SpanUnit::Weeks => "weeks",
            SpanUnit::Months => "months",
        };
        write!(f, "{} {}", self.amount, unit)
    }
}
