use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::secret::Credential;

/// Unix milliseconds. The only instant type stored or compared.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> i64 {
        self.duration_ms() / MINUTE_MS
    }

    /// Strict overlap: adjacent spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// A committed reservation of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub resource: String,
    pub span: Span,
    pub holder_name: String,
    pub contact: Option<String>,
    pub note: Option<String>,
    pub credential: Credential,
    pub created_at: Ms,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub name: String,
    /// Index in the configured resource list.
    pub position: usize,
    /// Committed reservations, sorted by `span.start`, pairwise non-overlapping.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(name: String, position: usize) -> Self {
        Self {
            name,
            position,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReservationAdmitted {
        id: Ulid,
        resource: String,
        span: Span,
        holder_name: String,
        contact: Option<String>,
        note: Option<String>,
        credential: Credential,
        created_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        resource: String,
    },
}

impl Event {
    pub fn resource(&self) -> &str {
        match self {
            Event::ReservationAdmitted { resource, .. }
            | Event::ReservationCancelled { resource, .. } => resource,
        }
    }

    pub fn admitted(reservation: &Reservation) -> Self {
        Event::ReservationAdmitted {
            id: reservation.id,
            resource: reservation.resource.clone(),
            span: reservation.span,
            holder_name: reservation.holder_name.clone(),
            contact: reservation.contact.clone(),
            note: reservation.note.clone(),
            credential: reservation.credential.clone(),
            created_at: reservation.created_at,
        }
    }
}

// ── Request / result types ───────────────────────────────────────

/// A booking as submitted by a caller, before any validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub resource: String,
    /// Civil start in the configured zone, e.g. `2026-07-15 10:00`.
    pub start: String,
    pub duration_minutes: i64,
    pub holder_name: String,
    pub contact: Option<String>,
    pub note: Option<String>,
}

/// Returned once on successful admission; the credential is never shown again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingReceipt {
    pub id: Ulid,
    pub cancel_credential: Credential,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub position: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub local_start: NaiveDateTime,
    pub start: Ms,
    /// Allowed durations (minutes) still bookable from this slot.
    pub bookable_minutes: Vec<u32>,
}

impl SlotInfo {
    pub fn available(&self) -> bool {
        !self.bookable_minutes.is_empty()
    }
}

/// Day view of one resource: candidate starts plus what already occupies the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots {
    pub resource: String,
    pub day: chrono::NaiveDate,
    pub slots: Vec<SlotInfo>,
    pub reservations: Vec<Reservation>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reservation(start: Ms, end: Ms) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource: "Campo 1".into(),
            span: Span::new(start, end),
            holder_name: "Mario".into(),
            contact: None,
            note: None,
            credential: Credential::generate(),
            created_at: 0,
        }
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_duration_minutes() {
        assert_eq!(Span::new(0, 90 * MINUTE_MS).duration_minutes(), 90);
    }

    #[test]
    fn reservation_ordering() {
        let mut rs = ResourceState::new("Campo 1".into(), 0);
        rs.insert_reservation(reservation(300, 400));
        rs.insert_reservation(reservation(100, 200));
        rs.insert_reservation(reservation(200, 300));
        let starts: Vec<Ms> = rs.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn reservation_remove() {
        let mut rs = ResourceState::new("Campo 1".into(), 0);
        let r = reservation(100, 200);
        let id = r.id;
        rs.insert_reservation(r);
        assert!(rs.get(id).is_some());
        assert_eq!(rs.remove_reservation(id).map(|r| r.id), Some(id));
        assert!(rs.reservations.is_empty());
        assert!(rs.remove_reservation(id).is_none());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = ResourceState::new("Campo 1".into(), 0);
        rs.insert_reservation(reservation(100, 200));
        rs.insert_reservation(reservation(450, 600));
        rs.insert_reservation(reservation(1000, 1100));

        let hits: Vec<_> = rs.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = ResourceState::new("Campo 1".into(), 0);
        rs.insert_reservation(reservation(100, 200));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 0);
        assert_eq!(rs.overlapping(&Span::new(0, 100)).count(), 0);
    }

    #[test]
    fn overlapping_single_ms_overlap() {
        let mut rs = ResourceState::new("Campo 1".into(), 0);
        rs.insert_reservation(reservation(100, 201));
        assert_eq!(rs.overlapping(&Span::new(200, 300)).count(), 1);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::admitted(&reservation(1000, 2000));
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.resource(), "Campo 1");
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in 0i64..1000, la in 1i64..500, b in 0i64..1000, lb in 1i64..500) {
            let x = Span::new(a, a + la);
            let y = Span::new(b, b + lb);
            prop_assert_eq!(x.overlaps(&y), y.overlaps(&x));
        }

        #[test]
        fn overlap_matches_shared_instant(a in 0i64..200, la in 1i64..50, b in 0i64..200, lb in 1i64..50) {
            let x = Span::new(a, a + la);
            let y = Span::new(b, b + lb);
            let shared = (a..a + la).any(|t| y.contains_instant(t));
            prop_assert_eq!(x.overlaps(&y), shared);
        }
    }
}
