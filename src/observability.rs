use std::net::SocketAddr;

use crate::sql::Command;

// ── Request metrics ─────────────────────────────────────────────

/// Counter: statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "fleetbook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "fleetbook_query_duration_seconds";

// ── Connections ─────────────────────────────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "fleetbook_connections_active";
pub const CONNECTIONS_TOTAL: &str = "fleetbook_connections_total";

/// Counter: connections refused at the max_connections limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "fleetbook_connections_rejected_total";

// ── Allocation engine ───────────────────────────────────────────

/// Counter: lifecycle transitions attempted. Labels: transition, outcome.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "fleetbook_booking_transitions_total";

/// Counter: availability searches that found nothing. Labels: resource.
pub const EMPTY_AVAILABILITY_TOTAL: &str = "fleetbook_empty_availability_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "fleetbook_wal_flush_duration_seconds";

/// Histogram: events per WAL flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "fleetbook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op when `port` is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter on {addr}: {e}"),
    }
}

pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertVehicle { .. } => "insert_vehicle",
        Command::UpdateVehicle { .. } => "update_vehicle",
        Command::DeleteVehicle { .. } => "delete_vehicle",
        Command::InsertDriver { .. } => "insert_driver",
        Command::UpdateDriver { .. } => "update_driver",
        Command::DeleteDriver { .. } => "delete_driver",
        Command::InsertBooking { .. } => "insert_booking",
        Command::TransitionBooking { .. } => "transition_booking",
        Command::SelectAvailableVehicles { .. } => "select_available_vehicles",
        Command::SelectAvailableDrivers { .. } => "select_available_drivers",
        Command::SelectVehicleCandidates { .. } => "select_vehicle_candidates",
        Command::SelectDriverCandidates { .. } => "select_driver_candidates",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectVehicles(_) => "select_vehicles",
        Command::SelectDrivers(_) => "select_drivers",
        Command::SelectFleetStats => "select_fleet_stats",
        Command::SelectDriverAlerts => "select_driver_alerts",
        Command::RefreshDrivers => "refresh_drivers",
    }
}
