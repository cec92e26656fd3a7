use tokio::sync::oneshot;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::secret::Credential;

use super::conflict::{check_capacity, check_no_conflict, now_ms};
use super::validate::validate_request;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Validate a booking and, if no committed reservation overlaps it,
    /// commit it. First committed wins: the overlap check and the commit
    /// happen under the resource's write lock.
    pub async fn book_reservation(&self, req: BookingRequest) -> Result<BookingReceipt, EngineError> {
        let booking = validate_request(&self.schedule, &req)?;
        let span = booking.span(&self.schedule)?;
        let rs = self.require_resource(&booking.resource)?;

        let guard = rs.write_owned().await;
        check_capacity(&guard)?;
        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let id = self.next_id()?;
        let credential = Credential::generate();
        let reservation = Reservation {
            id,
            resource: booking.resource,
            span,
            holder_name: booking.holder_name,
            contact: booking.contact,
            note: booking.note,
            credential: credential.clone(),
            created_at: now_ms(),
        };
        let event = Event::admitted(&reservation);
        self.persist_and_apply(guard, event).await?;

        metrics::counter!(observability::RESERVATIONS_ADMITTED_TOTAL).increment(1);
        info!(
            "admitted reservation {id} on {} at {} for {} min",
            reservation.resource,
            booking.local_start,
            booking.duration_minutes
        );
        Ok(BookingReceipt {
            id,
            cancel_credential: credential,
            span,
        })
    }

    /// Revoke a reservation if `credential` matches the one issued at booking.
    pub async fn cancel_reservation(&self, id: Ulid, credential: &str) -> Result<(), EngineError> {
        let resource = self
            .get_resource_for_reservation(&id)
            .ok_or(EngineError::NotFound(id))?;
        let rs = self.get_resource(&resource).ok_or(EngineError::NotFound(id))?;

        let guard = rs.write_owned().await;
        // Re-check under the lock: a concurrent cancel may have won.
        let existing = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if !existing.credential.matches(credential) {
            metrics::counter!(observability::CREDENTIAL_MISMATCHES_TOTAL).increment(1);
            return Err(EngineError::CredentialMismatch(id));
        }

        let event = Event::ReservationCancelled { id, resource: resource.clone() };
        self.persist_and_apply(guard, event).await?;
        info!("cancelled reservation {id} on {resource}");
        Ok(())
    }

    /// Compact the WAL by rewriting it with one admission per live reservation.
    ///
    /// Read locks on every resource are held until the swap completes, so no
    /// commit can land in the old file after the snapshot was taken.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut guards = Vec::with_capacity(self.schedule.resources.len());
        for name in &self.schedule.resources {
            let rs = self.require_resource(name)?;
            guards.push(rs.read_owned().await);
        }

        let events: Vec<Event> = guards
            .iter()
            .flat_map(|guard| guard.reservations.iter().map(Event::admitted))
            .collect();
        let live = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StorageUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StorageUnavailable(e.to_string()))?;

        drop(guards);
        info!("compacted WAL to {live} reservations");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
