//! Hard caps on request payloads and per-resource state.

/// Max characters in a holder name (after trimming).
pub const MAX_HOLDER_NAME_LEN: usize = 100;

/// Min characters in a holder name (after trimming).
pub const MIN_HOLDER_NAME_LEN: usize = 2;

pub const MAX_CONTACT_LEN: usize = 200;

pub const MAX_NOTE_LEN: usize = 500;

/// Max committed reservations held by a single resource.
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// Max configured resources.
pub const MAX_RESOURCES: usize = 64;

pub const MAX_RESOURCE_NAME_LEN: usize = 64;
