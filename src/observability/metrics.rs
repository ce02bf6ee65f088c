//! Metrics collection and exposition.
//!
//! # Metrics
//! - `relay_sessions_active` (gauge): sessions currently registered
//! - `relay_sessions_total` (counter): sessions ever registered
//! - `relay_frames_total` (counter): frames by direction and kind
//! - `relay_client_errors_total` (counter): error events by code
//! - `relay_upstream_closed_total` (counter): upstream endings by reason
//! - `relay_session_duration_seconds` (histogram): session lifetime
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const SESSIONS_ACTIVE: &str = "relay_sessions_active";
pub const SESSIONS_TOTAL: &str = "relay_sessions_total";
pub const FRAMES_TOTAL: &str = "relay_frames_total";
pub const CLIENT_ERRORS_TOTAL: &str = "relay_client_errors_total";
pub const UPSTREAM_CLOSED_TOTAL: &str = "relay_upstream_closed_total";
pub const SESSION_DURATION_SECONDS: &str = "relay_session_duration_seconds";

/// Install the global Prometheus recorder and serve it on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

/// One frame crossing the relay. `direction` is one of `client_in`,
/// `upstream_out`, `upstream_in`.
pub fn record_frame(direction: &'static str, kind: &'static str) {
    ::metrics::counter!(FRAMES_TOTAL, "direction" => direction, "kind" => kind).increment(1);
}

pub fn record_client_error(code: &'static str) {
    ::metrics::counter!(CLIENT_ERRORS_TOTAL, "code" => code).increment(1);
}

/// An upstream connection ended: `local`, `remote` or `error`.
pub fn record_upstream_closed(reason: &'static str) {
    ::metrics::counter!(UPSTREAM_CLOSED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_session_opened(active: usize) {
    ::metrics::counter!(SESSIONS_TOTAL).increment(1);
    ::metrics::gauge!(SESSIONS_ACTIVE).set(active as f64);
}

pub fn record_session_closed(active: usize, lifetime: Duration) {
    ::metrics::gauge!(SESSIONS_ACTIVE).set(active as f64);
    ::metrics::histogram!(SESSION_DURATION_SECONDS).record(lifetime.as_secs_f64());
}
