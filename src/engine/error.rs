use chrono::{NaiveDateTime, NaiveTime};
use ulid::Ulid;

use crate::model::Span;
use crate::time::TimeError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    UnknownResource(String),
    InvalidDuration {
        requested: i64,
        allowed: Vec<u32>,
    },
    MalformedTime(String),
    MisalignedStart {
        start: NaiveDateTime,
        step_minutes: u32,
        open: NaiveTime,
    },
    OutsideOpeningHours {
        start: NaiveDateTime,
        duration_minutes: u32,
        open: NaiveTime,
        close: NaiveTime,
    },
    InvalidHolderName,
    /// Wall time skipped by a DST transition, or otherwise not mappable to an instant.
    InvalidTime(String),
    SlotConflict {
        existing: Ulid,
        span: Span,
    },
    NotFound(Ulid),
    CredentialMismatch(Ulid),
    LimitExceeded(&'static str),
    StorageUnavailable(String),
}

impl EngineError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::UnknownResource(_) => "unknown_resource",
            EngineError::InvalidDuration { .. } => "invalid_duration",
            EngineError::MalformedTime(_) => "malformed_time",
            EngineError::MisalignedStart { .. } => "misaligned_start",
            EngineError::OutsideOpeningHours { .. } => "outside_opening_hours",
            EngineError::InvalidHolderName => "invalid_holder_name",
            EngineError::InvalidTime(_) => "invalid_time",
            EngineError::SlotConflict { .. } => "slot_conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::CredentialMismatch(_) => "credential_mismatch",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::UnknownResource(name) => write!(f, "unknown resource: {name:?}"),
            EngineError::InvalidDuration { requested, allowed } => {
                write!(f, "invalid duration {requested} min; allowed: {allowed:?}")
            }
            EngineError::MalformedTime(s) => {
                write!(f, "malformed time {s:?}; expected YYYY-MM-DD HH:MM")
            }
            EngineError::MisalignedStart {
                start,
                step_minutes,
                open,
            } => write!(
                f,
                "start {start} is not on a {step_minutes}-minute boundary counted from {open}"
            ),
            EngineError::OutsideOpeningHours {
                start,
                duration_minutes,
                open,
                close,
            } => write!(
                f,
                "{duration_minutes} min from {start} is outside opening hours {open}-{close}"
            ),
            EngineError::InvalidHolderName => {
                write!(f, "holder name must have at least 2 characters")
            }
            EngineError::InvalidTime(msg) => write!(f, "invalid time: {msg}"),
            EngineError::SlotConflict { existing, span } => write!(
                f,
                "slot conflict with reservation {existing} [{}, {})",
                span.start, span.end
            ),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::CredentialMismatch(id) => {
                write!(f, "credential does not match reservation {id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageUnavailable(e) => write!(f, "storage unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TimeError> for EngineError {
    fn from(e: TimeError) -> Self {
        match e {
            TimeError::Malformed(s) => EngineError::MalformedTime(s),
            other => EngineError::InvalidTime(other.to_string()),
        }
    }
}
