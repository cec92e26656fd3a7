use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// First committed reservation on this resource that overlaps `span`, if any.
/// Caller must hold the resource lock for the answer to stay valid.
pub(crate) fn check_no_conflict(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    match rs.overlapping(span).next() {
        Some(existing) => Err(EngineError::SlotConflict {
            existing: existing.id,
            span: existing.span,
        }),
        None => Ok(()),
    }
}

pub(crate) fn check_capacity(rs: &ResourceState) -> Result<(), EngineError> {
    if rs.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
        return Err(EngineError::LimitExceeded("too many reservations on resource"));
    }
    Ok(())
}

/// True when every pair of reservations on the resource is disjoint.
#[cfg(test)]
pub(crate) fn is_non_overlapping(rs: &ResourceState) -> bool {
    rs.reservations
        .windows(2)
        .all(|w| w[0].span.end <= w[1].span.start)
}
