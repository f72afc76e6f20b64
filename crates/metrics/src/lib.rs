//! Metric names and recorder setup.
//!
//! Call sites use the re-exported `counter!` / `gauge!` macros together with
//! the constants below. Without an installed recorder every call is a no-op.

pub use metrics::{counter, gauge, histogram};

/// Live WebSocket connections.
pub const CONNECTIONS_ACTIVE: &str = "gateway_connections_active";
/// Users with at least one live connection.
pub const ONLINE_USERS: &str = "gateway_online_users";
pub const MESSAGES_SENT_TOTAL: &str = "messages_sent_total";
pub const MESSAGES_SEEN_TOTAL: &str = "messages_seen_total";
pub const PUSH_FAILURES_TOTAL: &str = "push_failures_total";
pub const INBOUND_DROPPED_TOTAL: &str = "inbound_dropped_total";
pub const PRESENCE_BROADCASTS_TOTAL: &str = "presence_broadcasts_total";
/// Seconds from dispatch start to the last recipient enqueue.
pub const DISPATCH_DURATION_SECONDS: &str = "dispatch_duration_seconds";

#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus::PrometheusHandle;

/// Install the Prometheus recorder as the global metrics recorder.
///
/// The returned handle renders the text exposition format on demand; the
/// gateway serves it at `/metrics`.
#[cfg(feature = "prometheus")]
pub fn install_prometheus() -> anyhow::Result<PrometheusHandle> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install prometheus recorder: {e}"))
}
