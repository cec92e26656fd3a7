use chrono::NaiveDate;

use crate::model::*;
use crate::time;

use super::availability::{free_windows, opening_span, slot_availability};
use super::{Engine, EngineError};

impl Engine {
    /// Configured resources in display order.
    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        self.schedule
            .resources
            .iter()
            .enumerate()
            .map(|(position, name)| ResourceInfo {
                position,
                name: name.clone(),
            })
            .collect()
    }

    /// Day view: candidate slots with what is still bookable, plus the
    /// reservations that overlap the day. One read lock covers both.
    pub async fn get_slots(&self, resource: &str, day: NaiveDate) -> Result<DaySlots, EngineError> {
        let rs = self.require_resource(resource)?;
        let bounds = time::day_bounds(day, self.schedule.zone)?;
        let guard = rs.read().await;

        Ok(DaySlots {
            resource: resource.to_string(),
            day,
            slots: slot_availability(&guard, &self.schedule, day),
            reservations: guard.overlapping(&bounds).cloned().collect(),
        })
    }

    /// Reservations whose span overlaps the absolute range of the civil `day`.
    pub async fn reservations_overlapping_day(
        &self,
        resource: &str,
        day: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.require_resource(resource)?;
        let bounds = time::day_bounds(day, self.schedule.zone)?;
        let guard = rs.read().await;
        Ok(guard.overlapping(&bounds).cloned().collect())
    }

    /// Every reservation of `resource`, ordered by start.
    pub async fn reservations_for(&self, resource: &str) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.require_resource(resource)?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    /// Free stretches of the opening window on `day`.
    pub async fn free_windows(&self, resource: &str, day: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let rs = self.require_resource(resource)?;
        let opening = opening_span(&self.schedule, day)?;
        let guard = rs.read().await;
        Ok(free_windows(&guard, &opening))
    }

    /// Administrative export: all reservations across resources, ordered by
    /// start, then resource position, then id.
    pub async fn list_all_reservations(&self) -> Vec<Reservation> {
        let mut all = Vec::new();
        for name in &self.schedule.resources {
            if let Some(rs) = self.get_resource(name) {
                let guard = rs.read().await;
                all.extend(guard.reservations.iter().cloned());
            }
        }
        let position = |name: &str| self.schedule.resources.iter().position(|r| r == name);
        all.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then_with(|| position(&a.resource).cmp(&position(&b.resource)))
                .then_with(|| a.id.cmp(&b.id))
        });
        all
    }
}
