use std::net::SocketAddr;

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests served. Labels: route, status.
pub const HTTP_REQUESTS_TOTAL: &str = "stayledger_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: route.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "stayledger_http_request_duration_seconds";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "stayledger_reservations_total";

/// Counter: ledger releases committed.
pub const RELEASES_TOTAL: &str = "stayledger_releases_total";

/// Counter: application status changes. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "stayledger_transitions_total";

/// Counter: releases that hit a missing record or a zero counter, and
/// applied reservations that overbooked a day. Labels: kind.
pub const LEDGER_INCONSISTENCIES_TOTAL: &str = "stayledger_ledger_inconsistencies_total";

/// Counter: slot rollups corrected by reconciliation.
pub const ROLLUP_DRIFT_TOTAL: &str = "stayledger_rollup_drift_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: opportunities held in memory.
pub const OPPORTUNITIES_ACTIVE: &str = "stayledger_opportunities_active";

/// Counter: lock or queue waits that hit the storage timeout. Labels: lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "stayledger_lock_timeouts_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayledger_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "stayledger_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://{addr}/metrics"),
        Err(e) => tracing::error!(error = %e, "failed to install Prometheus exporter"),
    }
}

/// Short, stable label for an error kind. Doubles as the API error code.
pub fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::SlotNotFound(_) => "SLOT_NOT_FOUND",
        EngineError::SlotClosed(_) => "SLOT_CLOSED",
        EngineError::DateRangeOutOfBounds { .. } => "DATE_RANGE_OUT_OF_BOUNDS",
        EngineError::MinimumStayViolation { .. } => "MINIMUM_STAY_VIOLATION",
        EngineError::CapacityRecordMissing(_) => "DATE_NOT_BOOKABLE",
        EngineError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
        EngineError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        EngineError::NotFound(_) => "NOT_FOUND",
        EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
        EngineError::DuplicateApplication { .. } => "DUPLICATE_APPLICATION",
        EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
        EngineError::NotPermitted(_) => "NOT_PERMITTED",
        EngineError::InvalidInput(_) => "INVALID_INPUT",
        EngineError::CapacityBelowBooked { .. } => "CAPACITY_BELOW_BOOKED",
        EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
    }
}

/// Count a reservation that was turned away.
pub fn record_reservation_rejected(err: &EngineError) {
    metrics::counter!(RESERVATIONS_TOTAL, "outcome" => error_code(err)).increment(1);
}
