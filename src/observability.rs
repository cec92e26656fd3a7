use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "courtbook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "courtbook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "courtbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "courtbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "courtbook_connections_rejected_total";

/// Counter: export requests with a missing or wrong admin secret.
pub const ADMIN_AUTH_FAILURES_TOTAL: &str = "courtbook_admin_auth_failures_total";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: reservations committed.
pub const RESERVATIONS_ADMITTED_TOTAL: &str = "courtbook_reservations_admitted_total";

/// Counter: bookings refused because a committed reservation overlaps.
pub const BOOKING_CONFLICTS_TOTAL: &str = "courtbook_booking_conflicts_total";

/// Counter: cancellations refused for a wrong credential.
pub const CREDENTIAL_MISMATCHES_TOTAL: &str = "courtbook_credential_mismatches_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtbook_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectResources => "select_resources",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAllReservations { .. } => "select_all_reservations",
        Command::InsertReservation(_) => "insert_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
    }
}
