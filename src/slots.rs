//! Candidate start times for a day, generated in civil time.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Minutes since local midnight, ignoring seconds.
pub fn minute_of_day(t: NaiveTime) -> u32 {
    t.hour() * 60 + t.minute()
}

fn time_at_minute(minute: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
}

/// Ordered start times `open, open + step, …` while `start + min_duration <= close`.
///
/// A plain value: cloning it restarts the sequence from the beginning.
#[derive(Debug, Clone)]
pub struct Slots {
    day: NaiveDate,
    next: u32,
    last_start: Option<u32>,
    step: u32,
}

/// Build the slot sequence for `day`. Empty when no `min_duration` block fits
/// between `open` and `close`, or when `step` is zero.
pub fn slots_for(
    day: NaiveDate,
    open: NaiveTime,
    close: NaiveTime,
    step_minutes: u32,
    min_duration_minutes: u32,
) -> Slots {
    let open_min = minute_of_day(open);
    let close_min = minute_of_day(close);
    let last_start = close_min
        .checked_sub(min_duration_minutes)
        .filter(|last| *last >= open_min && step_minutes > 0);
    Slots {
        day,
        next: open_min,
        last_start,
        step: step_minutes,
    }
}

impl Iterator for Slots {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<NaiveDateTime> {
        let last = self.last_start?;
        if self.next > last {
            return None;
        }
        let t = time_at_minute(self.next)?;
        self.next += self.step;
        Some(self.day.and_time(t))
    }
}
