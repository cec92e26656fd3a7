use chrono::{NaiveDateTime, Timelike};

use crate::config::Schedule;
use crate::limits::*;
use crate::model::*;
use crate::slots::minute_of_day;
use crate::time;

use super::EngineError;

/// A booking request that passed every rule that does not need stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValidatedBooking {
    pub resource: String,
    pub local_start: NaiveDateTime,
    pub duration_minutes: u32,
    pub holder_name: String,
    pub contact: Option<String>,
    pub note: Option<String>,
}

impl ValidatedBooking {
    /// Absolute span of the booking; fails on a wall time skipped by DST.
    pub fn span(&self, schedule: &Schedule) -> Result<Span, EngineError> {
        let start = time::to_absolute(self.local_start, schedule.zone)?;
        Ok(Span::new(start, start + self.duration_minutes as Ms * MINUTE_MS))
    }
}

/// Run the request through the stateless rules in order, stopping at the first failure.
pub(crate) fn validate_request(
    schedule: &Schedule,
    req: &BookingRequest,
) -> Result<ValidatedBooking, EngineError> {
    if !schedule.resources.iter().any(|r| r == &req.resource) {
        return Err(EngineError::UnknownResource(req.resource.clone()));
    }

    if !schedule.allows_duration(req.duration_minutes) {
        return Err(EngineError::InvalidDuration {
            requested: req.duration_minutes,
            allowed: schedule.durations.clone(),
        });
    }
    let duration_minutes = req.duration_minutes as u32;

    let local_start = time::parse_civil(&req.start)?;

    check_alignment(schedule, local_start)?;
    check_opening_hours(schedule, local_start, duration_minutes)?;

    let holder_name = req.holder_name.trim();
    let name_len = holder_name.chars().count();
    if name_len < MIN_HOLDER_NAME_LEN {
        return Err(EngineError::InvalidHolderName);
    }
    if name_len > MAX_HOLDER_NAME_LEN {
        return Err(EngineError::LimitExceeded("holder name too long"));
    }
    let contact = optional_text(req.contact.as_deref(), MAX_CONTACT_LEN, "contact too long")?;
    let note = optional_text(req.note.as_deref(), MAX_NOTE_LEN, "note too long")?;

    Ok(ValidatedBooking {
        resource: req.resource.clone(),
        local_start,
        duration_minutes,
        holder_name: holder_name.to_string(),
        contact,
        note,
    })
}

/// Start must sit on a whole `step` counted from opening time, with zero seconds.
fn check_alignment(schedule: &Schedule, start: NaiveDateTime) -> Result<(), EngineError> {
    let t = start.time();
    let offset = minute_of_day(t) as i64 - schedule.open_minute() as i64;
    let aligned = t.second() == 0
        && t.nanosecond() == 0
        && offset.rem_euclid(schedule.step_minutes as i64) == 0;
    if aligned {
        Ok(())
    } else {
        Err(EngineError::MisalignedStart {
            start,
            step_minutes: schedule.step_minutes,
            open: schedule.open,
        })
    }
}

/// Both ends of the booking fall within `[open, close]` of the start's own day.
fn check_opening_hours(
    schedule: &Schedule,
    start: NaiveDateTime,
    duration_minutes: u32,
) -> Result<(), EngineError> {
    let start_min = minute_of_day(start.time());
    let end_min = start_min + duration_minutes;
    if start_min >= schedule.open_minute() && end_min <= schedule.close_minute() {
        Ok(())
    } else {
        Err(EngineError::OutsideOpeningHours {
            start,
            duration_minutes,
            open: schedule.open,
            close: schedule.close,
        })
    }
}

fn optional_text(
    value: Option<&str>,
    max_len: usize,
    too_long: &'static str,
) -> Result<Option<String>, EngineError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > max_len => Err(EngineError::LimitExceeded(too_long)),
        Some(v) => Ok(Some(v.to_string())),
    }
}
