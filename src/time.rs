//! Civil ↔ absolute time conversion for the configured zone.
//!
//! Everything stored or compared is an absolute instant ([`Ms`]). Civil
//! values only appear at the edges: parsing requests and printing results.

use chrono::offset::LocalResult;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone};
use chrono_tz::Tz;

use crate::model::{Ms, Span};

const CIVIL_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// How far past local midnight to search for the first existing wall time
/// when midnight itself falls in a DST gap.
const MAX_MIDNIGHT_GAP_STEPS: i64 = 12;
const MIDNIGHT_GAP_STEP_MINUTES: i64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    /// Text that is not a civil date-time (or date) at all.
    Malformed(String),
    /// Wall time skipped by a DST transition in the zone.
    Nonexistent(NaiveDateTime),
    /// Instant outside the representable calendar range.
    OutOfRange(Ms),
}

impl std::fmt::Display for TimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeError::Malformed(s) => write!(f, "malformed time: {s:?}"),
            TimeError::Nonexistent(t) => write!(f, "local time {t} does not exist in zone"),
            TimeError::OutOfRange(ms) => write!(f, "instant {ms} out of range"),
        }
    }
}

impl std::error::Error for TimeError {}

/// Civil date-time in `zone` → instant.
///
/// Ambiguous wall times (DST fold) resolve to the earlier instant.
/// Nonexistent wall times (DST gap) are an error, never shifted.
pub fn to_absolute(civil: NaiveDateTime, zone: Tz) -> Result<Ms, TimeError> {
    match zone.from_local_datetime(&civil) {
        LocalResult::Single(dt) => Ok(dt.timestamp_millis()),
        LocalResult::Ambiguous(a, b) => Ok(a.timestamp_millis().min(b.timestamp_millis())),
        LocalResult::None => Err(TimeError::Nonexistent(civil)),
    }
}

/// Instant → civil date-time in `zone`.
pub fn to_civil(instant: Ms, zone: Tz) -> Result<NaiveDateTime, TimeError> {
    let utc = DateTime::from_timestamp_millis(instant).ok_or(TimeError::OutOfRange(instant))?;
    Ok(utc.with_timezone(&zone).naive_local())
}

/// First existing instant of `day` in `zone`.
pub fn start_of_day(day: NaiveDate, zone: Tz) -> Result<Ms, TimeError> {
    let midnight = day.and_time(NaiveTime::MIN);
    for step in 0..=MAX_MIDNIGHT_GAP_STEPS {
        let candidate = midnight + Duration::minutes(step * MIDNIGHT_GAP_STEP_MINUTES);
        match to_absolute(candidate, zone) {
            Ok(ms) => return Ok(ms),
            Err(TimeError::Nonexistent(_)) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(TimeError::Nonexistent(midnight))
}

/// Absolute range covered by the civil `day`: `[start of day, start of next day)`.
/// 23 or 25 hours long on DST transition days.
pub fn day_bounds(day: NaiveDate, zone: Tz) -> Result<Span, TimeError> {
    let next = day
        .succ_opt()
        .ok_or_else(|| TimeError::Malformed(format!("no day after {day}")))?;
    Ok(Span::new(start_of_day(day, zone)?, start_of_day(next, zone)?))
}

pub fn parse_civil(text: &str) -> Result<NaiveDateTime, TimeError> {
    let trimmed = text.trim();
    CIVIL_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| TimeError::Malformed(text.to_string()))
}

pub fn parse_day(text: &str) -> Result<NaiveDate, TimeError> {
    NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")
        .map_err(|_| TimeError::Malformed(text.to_string()))
}

/// RFC 3339 with the zone's offset at that instant, e.g. `2026-07-15T10:00:00+02:00`.
pub fn format_instant(instant: Ms, zone: Tz) -> Result<String, TimeError> {
    let utc = DateTime::from_timestamp_millis(instant).ok_or(TimeError::OutOfRange(instant))?;
    Ok(utc
        .with_timezone(&zone)
        .to_rfc3339_opts(SecondsFormat::Secs, false))
}
