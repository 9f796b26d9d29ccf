use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "taskshift_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "taskshift_query_duration_seconds";

// ── Reconciliation ──────────────────────────────────────────────

/// Counter: committed relocations.
pub const RELOCATIONS_TOTAL: &str = "taskshift_relocations_total";

/// Counter: committed insertions (each one reshuffles a timeline).
pub const TASKS_INSERTED_TOTAL: &str = "taskshift_tasks_inserted_total";

/// Counter: neighbouring tasks moved by a cascade or reshuffle.
pub const TASKS_SHIFTED_TOTAL: &str = "taskshift_tasks_shifted_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "taskshift_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "taskshift_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "taskshift_connections_rejected_total";

/// Gauge: registered engineers.
pub const ENGINEERS_ACTIVE: &str = "taskshift_engineers_active";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
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
        Command::InsertEngineers { .. } => "insert_engineers",
        Command::InsertTasks { .. } => "insert_tasks",
        Command::Relocate { .. } => "relocate",
        Command::DeleteTask { .. } => "delete_task",
        Command::SelectTasks { .. } => "select_tasks",
        Command::SelectEngineers => "select_engineers",
        Command::SelectConflicts { .. } => "select_conflicts",
    }
}
