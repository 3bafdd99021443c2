//! Metric names and the optional Prometheus exporter.
//!
//! Counters are recorded through the `metrics` facade; without an installed
//! recorder they cost next to nothing.

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

pub const NOTIFICATIONS: &str = "avf_notifications_total";
pub const VERDICTS: &str = "avf_verdicts_total";
pub const UNDECODABLE: &str = "avf_undecodable_notifications_total";
pub const REPLY_FAILURES: &str = "avf_reply_failures_total";
pub const CONSULTANT_RECONNECTS: &str = "avf_consultant_reconnect_attempts_total";
pub const CONSULTANT_RECONNECT_FAILURES: &str = "avf_consultant_reconnect_failures_total";
pub const CONSULTANT_INVALID_ANSWERS: &str = "avf_consultant_invalid_answers_total";
pub const CONSULTANT_CONNECTED: &str = "avf_consultant_connected";

pub fn describe() {
    describe_counter!(NOTIFICATIONS, "Notifications received, by operation");
    describe_counter!(VERDICTS, "Verdicts sent to the filter, by outcome");
    describe_counter!(UNDECODABLE, "Notifications whose body failed to decode");
    describe_counter!(REPLY_FAILURES, "FilterReplyMessage failures");
    describe_counter!(CONSULTANT_RECONNECTS, "Consultant connect + handshake attempts");
    describe_counter!(CONSULTANT_RECONNECT_FAILURES, "Failed consultant connect + handshake attempts");
    describe_counter!(CONSULTANT_INVALID_ANSWERS, "Consultant answers discarded as short or mismatched");
    describe_gauge!(CONSULTANT_CONNECTED, "1 while the consultant link is ready");
}

/// Install the global recorder and serve `/metrics` on `listen`.
pub fn install_exporter(listen: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    describe();
    log::info!("Prometheus exporter listening on {listen}");
    Ok(())
}
