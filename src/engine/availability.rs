use chrono::NaiveDate;

use crate::config::Schedule;
use crate::model::*;
use crate::slots::{minute_of_day, slots_for};
use crate::time;

use super::EngineError;

// ── Day view ──────────────────────────────────────────────────────

/// Candidate slots of `day` with the durations still bookable from each.
///
/// Slots whose wall time does not exist (DST gap) are left out.
pub fn slot_availability(rs: &ResourceState, schedule: &Schedule, day: NaiveDate) -> Vec<SlotInfo> {
    let close_min = schedule.close_minute();
    slots_for(
        day,
        schedule.open,
        schedule.close,
        schedule.step_minutes,
        schedule.min_duration(),
    )
    .filter_map(|local_start| {
        let start = match time::to_absolute(local_start, schedule.zone) {
            Ok(ms) => ms,
            Err(e) => {
                tracing::debug!("skipping slot {local_start}: {e}");
                return None;
            }
        };
        let start_min = minute_of_day(local_start.time());
        let bookable_minutes = schedule
            .durations
            .iter()
            .copied()
            .filter(|&d| start_min + d <= close_min)
            .filter(|&d| {
                let span = Span::new(start, start + d as Ms * MINUTE_MS);
                rs.overlapping(&span).next().is_none()
            })
            .collect();
        Some(SlotInfo {
            local_start,
            start,
            bookable_minutes,
        })
    })
    .collect()
}

/// Absolute opening window of `day`.
pub fn opening_span(schedule: &Schedule, day: NaiveDate) -> Result<Span, EngineError> {
    let open = time::to_absolute(day.and_time(schedule.open), schedule.zone)?;
    let close = time::to_absolute(day.and_time(schedule.close), schedule.zone)?;
    Ok(Span::new(open, close))
}

/// Free stretches of the opening window not covered by any reservation.
pub fn free_windows(rs: &ResourceState, opening: &Span) -> Vec<Span> {
    let busy: Vec<Span> = rs.overlapping(opening).map(|r| r.span).collect();
    subtract_intervals(&[*opening], &merge_overlapping(&busy))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted, disjoint `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::Credential;
    use chrono::NaiveTime;
    use ulid::Ulid;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 15).unwrap()
    }

    fn at(h: u32, m: u32) -> Ms {
        time::to_absolute(day().and_hms_opt(h, m, 0).unwrap(), chrono_tz::Europe::Rome).unwrap()
    }

    fn booked(spans: &[(Ms, Ms)]) -> ResourceState {
        let mut rs = ResourceState::new("Campo 1".into(), 0);
        for &(start, end) in spans {
            rs.insert_reservation(Reservation {
                id: Ulid::new(),
                resource: "Campo 1".into(),
                span: Span::new(start, end),
                holder_name: "Mario".into(),
                contact: None,
                note: None,
                credential: Credential::generate(),
                created_at: 0,
            });
        }
        rs
    }

    fn slot<'a>(slots: &'a [SlotInfo], h: u32, m: u32) -> &'a SlotInfo {
        let t = NaiveTime::from_hms_opt(h, m, 0).unwrap();
        slots.iter().find(|s| s.local_start.time() == t).unwrap()
    }

    // ── slot_availability ─────────────────────────────────

    #[test]
    fn empty_day_offers_every_fitting_duration() {
        let s = Schedule::default();
        let slots = slot_availability(&booked(&[]), &s, day());
        assert_eq!(slots.len(), 27);
        assert_eq!(slot(&slots, 8, 0).bookable_minutes, vec![60, 90, 120]);
        assert_eq!(slot(&slots, 20, 30).bookable_minutes, vec![60, 90]);
        assert_eq!(slot(&slots, 21, 0).bookable_minutes, vec![60]);
        assert!(slots.iter().all(SlotInfo::available));
    }

    #[test]
    fn reservation_blocks_overlapping_durations_only() {
        let s = Schedule::default();
        let rs = booked(&[(at(10, 0), at(11, 0))]);
        let slots = slot_availability(&rs, &s, day());
        assert!(!slot(&slots, 10, 0).available());
        assert!(!slot(&slots, 10, 30).available());
        // 09:00 + 60 ends exactly at 10:00: still bookable.
        assert_eq!(slot(&slots, 9, 0).bookable_minutes, vec![60]);
        assert_eq!(slot(&slots, 8, 0).bookable_minutes, vec![60, 90, 120]);
        assert_eq!(slot(&slots, 11, 0).bookable_minutes, vec![60, 90, 120]);
    }

    #[test]
    fn slot_instants_follow_zone() {
        let s = Schedule::default();
        let slots = slot_availability(&booked(&[]), &s, day());
        assert_eq!(slot(&slots, 8, 0).start, at(8, 0));
    }

    #[test]
    fn gap_slots_are_omitted() {
        let s = Schedule {
            open: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            ..Schedule::default()
        };
        let spring = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let slots = slot_availability(&booked(&[]), &s, spring);
        let times: Vec<_> = slots.iter().map(|s| s.local_start.time()).collect();
        assert!(!times.contains(&NaiveTime::from_hms_opt(2, 0, 0).unwrap()));
        assert!(!times.contains(&NaiveTime::from_hms_opt(2, 30, 0).unwrap()));
        assert!(times.contains(&NaiveTime::from_hms_opt(3, 0, 0).unwrap()));
        // 00:00 .. 05:00 every 30 min = 11 candidates, 2 fall in the gap.
        assert_eq!(slots.len(), 9);
    }

    // ── free_windows ──────────────────────────────────────

    #[test]
    fn free_windows_punch_out_reservations() {
        let s = Schedule::default();
        let opening = opening_span(&s, day()).unwrap();
        let rs = booked(&[(at(10, 0), at(11, 0)), (at(11, 0), at(12, 30)), (at(20, 0), at(22, 0))]);
        assert_eq!(
            free_windows(&rs, &opening),
            vec![Span::new(at(8, 0), at(10, 0)), Span::new(at(12, 30), at(20, 0))]
        );
    }

    #[test]
    fn free_windows_empty_resource() {
        let s = Schedule::default();
        let opening = opening_span(&s, day()).unwrap();
        assert_eq!(free_windows(&booked(&[]), &opening), vec![opening]);
    }

    // ── subtract_intervals / merge_overlapping ────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![Span::new(100, 200), Span::new(300, 400)];
        let remove = vec![Span::new(200, 300)];
        assert_eq!(subtract_intervals(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let result = subtract_intervals(&[Span::new(100, 200)], &[Span::new(50, 250)]);
        assert!(result.is_empty());
    }

    #[test]
    fn subtract_multiple_punches() {
        let remove = vec![Span::new(100, 200), Span::new(400, 500), Span::new(800, 900)];
        assert_eq!(
            subtract_intervals(&[Span::new(0, 1000)], &remove),
            vec![
                Span::new(0, 100),
                Span::new(200, 400),
                Span::new(500, 800),
                Span::new(900, 1000),
            ]
        );
    }

    #[test]
    fn merge_adjacent() {
        let merged = merge_overlapping(&[Span::new(100, 200), Span::new(200, 300), Span::new(400, 500)]);
        assert_eq!(merged, vec![Span::new(100, 300), Span::new(400, 500)]);
    }
}
