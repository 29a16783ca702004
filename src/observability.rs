use std::net::SocketAddr;

use crate::model::FailureReason;

// ── Allocation outcomes ─────────────────────────────────────────

/// Counter: per-target reservation attempts. Labels: outcome.
pub const RESERVATIONS_TOTAL: &str = "allotment_reservations_total";

/// Counter: self-service cancellations. Labels: outcome.
pub const CANCELLATIONS_TOTAL: &str = "allotment_cancellations_total";

/// Histogram: wall time of one batch assignment in seconds.
pub const BATCH_DURATION_SECONDS: &str = "allotment_batch_duration_seconds";

/// Counter: items materialised by the ad-hoc factory.
pub const ADHOC_ITEMS_CREATED_TOTAL: &str = "allotment_adhoc_items_created_total";

/// Counter: ephemeral items left behind after a cancellation could not delete them.
pub const EPHEMERAL_CLEANUP_FAILURES_TOTAL: &str = "allotment_ephemeral_cleanup_failures_total";

/// Counter: orphaned ephemeral items reclaimed by the sweeper.
pub const ITEMS_SWEPT_TOTAL: &str = "allotment_items_swept_total";

/// Counter: transient store errors that were retried.
pub const STORE_RETRIES_TOTAL: &str = "allotment_store_retries_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "allotment_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "allotment_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a per-target failure.
pub fn failure_label(reason: &FailureReason) -> &'static str {
    match reason {
        FailureReason::NotFound => "not_found",
        FailureReason::Inactive => "inactive",
        FailureReason::CapacityExceeded => "capacity_exceeded",
        FailureReason::LimitExceeded => "limit_exceeded",
        FailureReason::Transient(_) => "transient",
        FailureReason::Cancelled => "cancelled",
    }
}
